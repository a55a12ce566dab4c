pub mod net;
pub mod qemu;
pub mod supervisor;

pub use qemu::{command_line, compile};
pub use supervisor::{RunningInstance, Supervisor};
