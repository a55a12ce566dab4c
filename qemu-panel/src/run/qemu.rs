use std::{collections::BTreeSet, path::Path};

use crate::profile::{BootDevice, NetworkMode, UsbDeviceId, VmProfile};


/// Disk images are always declared with this format, whatever the file holds.
pub const DISK_FORMAT: &str = "qcow2";

/// Turns a profile into the argument vector of a QEMU invocation.
///
/// Token 0 is the executable. The emission order is fixed since QEMU
/// applies some options positionally. Nothing is validated here, a bad path
/// only shows up once the tokens are handed to the supervisor.
pub fn compile(profile: &VmProfile, passthrough: &BTreeSet<UsbDeviceId>) -> Vec<String> {
    let mut cmd = CommandLine::new(&profile.executable);

    cmd.arg("-m").arg(profile.ram.to_string());
    cmd.arg("-smp").arg(profile.cpus.to_string());

    match profile.boot {
        BootDevice::Iso => {
            cmd.cdrom(profile.iso.as_deref());
            cmd.disk(profile.disk.as_deref());
        }
        BootDevice::Disk => {
            cmd.disk(profile.disk.as_deref());
            cmd.cdrom(profile.iso.as_deref());
        }
    }

    if let Some(firmware) = profile.firmware() {
        cmd.arg("-drive").arg(format!(
            "if=pflash,format=raw,readonly=on,file={}",
            firmware.display()
        ));
    }

    cmd.split_args(&profile.extra);

    for dev in passthrough {
        cmd.arg("-device").arg(format!("usb-host,hostdevice={dev}"));
    }

    match profile.network_mode {
        NetworkMode::Nat => {
            cmd.args(["-net", "nic", "-net", "user"]);
        }
        NetworkMode::Bridged => {
            cmd.args(["-net", "nic", "-net", "tap"]);
        }
        NetworkMode::Custom => {
            cmd.split_args(&profile.network_options);
        }
    }

    cmd.into_tokens()
}

/// Joins tokens for display, the way they would be typed in a shell.
pub fn command_line(tokens: &[String]) -> String {
    tokens.join(" ")
}

struct CommandLine {
    tokens: Vec<String>,
}

impl CommandLine {
    fn new(program: &Path) -> Self {
        Self {
            tokens: vec![program.to_string_lossy().to_string()],
        }
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.tokens.push(arg.into());
        self
    }

    fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Whitespace split, no quoting.
    fn split_args(&mut self, raw: &str) -> &mut Self {
        self.args(raw.split_whitespace())
    }

    fn cdrom(&mut self, iso: Option<&Path>) {
        if let Some(iso) = iso {
            self.arg("-cdrom").arg(iso.to_string_lossy());
        }
    }

    fn disk(&mut self, disk: Option<&Path>) {
        if let Some(disk) = disk {
            self.arg("-drive")
                .arg(format!("file={},format={DISK_FORMAT}", disk.display()));
        }
    }

    fn into_tokens(self) -> Vec<String> {
        self.tokens
    }
}
