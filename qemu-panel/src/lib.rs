pub mod config;
pub mod ctx;
pub mod disk;
pub mod download;
pub mod error;
pub mod library;
pub mod panel;
pub mod profile;
pub mod run;
pub mod ui;
pub mod usb;
mod utils;

pub use error::{Error, Result};

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
