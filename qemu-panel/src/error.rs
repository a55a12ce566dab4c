use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The profile's executable path is empty or points at nothing.
    #[error("QEMU executable not found: `{}`, set the correct QEMU executable", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("could not start `{program}`: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("failed to save profiles to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read profiles from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("profile file {} is malformed: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("usb enumeration failed: {0}")]
    Enumeration(std::io::Error),

    #[error("download of {url} failed: {source}")]
    Download { url: String, source: reqwest::Error },

    #[error("writing {} failed: {source}", path.display())]
    DownloadIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no profile matches `{0}`")]
    ProfileNotFound(String),

    #[error("profile `{0}` has no iso library directory")]
    NoIsoLibrary(String),

    #[error("cannot delete the last remaining profile")]
    LastProfile,

    #[error("invalid usb device id `{0}`, expected `0xVVVV:0xPPPP`")]
    InvalidUsbId(String),

    #[error("invalid disk size {0} GB, expected 1..=2048")]
    InvalidDiskSize(u32),

    #[error("could not create disk image {}: {reason}", path.display())]
    DiskCreate { path: PathBuf, reason: String },
}
