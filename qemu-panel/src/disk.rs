use std::path::{Path, PathBuf};

use byte_unit::Byte;
use colored::Colorize;

use crate::{
    error::{Error, Result},
    utils::Command,
};

pub const MAX_DISK_GB: u32 = 2048;

/// `qemu-img` shipped next to the emulator, else whatever is on `PATH`.
pub fn qemu_img_for(executable: &Path) -> PathBuf {
    let name = if executable
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
    {
        "qemu-img.exe"
    } else {
        "qemu-img"
    };

    if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
        let sibling = dir.join(name);
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(name)
}

/// Image format chosen from the file name.
pub fn format_for(path: &Path) -> &'static str {
    if path.to_string_lossy().ends_with(".qcow2") {
        "qcow2"
    } else {
        "raw"
    }
}

/// Creates an empty disk image of `size_gb` gigabytes with `qemu-img`.
pub fn create(workdir: &Path, executable: &Path, path: &Path, size_gb: u32) -> Result<()> {
    create_with(workdir, &qemu_img_for(executable), path, size_gb)
}

fn create_with(workdir: &Path, qemu_img: &Path, path: &Path, size_gb: u32) -> Result<()> {
    if !(1..=MAX_DISK_GB).contains(&size_gb) {
        return Err(Error::InvalidDiskSize(size_gb));
    }

    let mut cmd = Command::new(qemu_img, workdir);
    cmd.args(["create", "-f", format_for(path)])
        .arg(path)
        .arg(format!("{size_gb}G"));

    cmd.run().map_err(|e| Error::DiskCreate {
        path: path.to_path_buf(),
        reason: format!("{} ({e})", qemu_img.display()),
    })?;

    let size = Byte::from_u64(u64::from(size_gb) * 1024 * 1024 * 1024);
    println!(
        "{}",
        format!("Created disk image {} ({size:#})", path.display()).green()
    );
    Ok(())
}
