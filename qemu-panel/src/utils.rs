use std::{
    ffi::OsStr,
    ops::{Deref, DerefMut},
    path::Path,
};

use colored::Colorize;

/// `std::process::Command` that runs in a fixed directory and can echo
/// itself before running.
pub struct Command {
    inner: std::process::Command,
}

impl Deref for Command {
    type Target = std::process::Command;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Command {
    pub fn new<S>(program: S, workdir: &Path) -> Command
    where
        S: AsRef<OsStr>,
    {
        let mut cmd = std::process::Command::new(program);
        cmd.current_dir(workdir);

        Self { inner: cmd }
    }

    pub fn cmd_string(&self) -> String {
        let mut cmd_str = self.get_program().to_string_lossy().to_string();

        for arg in self.get_args() {
            cmd_str += " ";
            cmd_str += arg.to_string_lossy().as_ref();
        }
        cmd_str
    }

    pub fn print_cmd(&self) {
        println!("{}", self.cmd_string().purple().bold());
    }

    /// Runs to completion, failing on a non-zero exit status.
    pub fn run(&mut self) -> anyhow::Result<()> {
        self.print_cmd();
        let status = self.status()?;
        if !status.success() {
            bail!("failed with status: {status}");
        }
        Ok(())
    }

    pub fn arg<S>(&mut self, arg: S) -> &mut Command
    where
        S: AsRef<OsStr>,
    {
        self.inner.arg(arg);
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg.as_ref());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_string_joins_program_and_args() {
        let mut cmd = Command::new("qemu-img", Path::new("."));
        cmd.args(["create", "-f", "qcow2", "disk.qcow2", "10G"]);
        assert_eq!(cmd.cmd_string(), "qemu-img create -f qcow2 disk.qcow2 10G");
    }
}
