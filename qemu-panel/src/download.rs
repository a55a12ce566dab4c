//! ISO downloads.
//!
//! The transfer runs as a background task and reports back over a channel.
//! Only the receiving side touches the progress bar or the profiles, and
//! only when a message arrives.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::error::{Error, Result};

#[derive(Debug)]
pub enum DownloadEvent {
    /// Response received, `total` is the announced content length
    Started { total: Option<u64> },
    Progress { downloaded: u64 },
    Finished { path: PathBuf, bytes: u64 },
    Failed(Error),
}

/// Starts downloading `url` into `dest`.
///
/// A single GET, no resume, retry, checksum or timeout. The last message
/// on the channel is always `Finished` or `Failed`.
pub fn spawn(url: String, dest: PathBuf) -> (JoinHandle<()>, UnboundedReceiver<DownloadEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let last = match fetch(&url, &dest, &tx).await {
            Ok(bytes) => DownloadEvent::Finished { path: dest, bytes },
            Err(e) => DownloadEvent::Failed(e),
        };
        let _ = tx.send(last);
    });
    (handle, rx)
}

async fn fetch(url: &str, dest: &Path, tx: &UnboundedSender<DownloadEvent>) -> Result<u64> {
    let http_err = |source| Error::Download {
        url: url.to_string(),
        source,
    };
    let io_err = |source| Error::DownloadIo {
        path: dest.to_path_buf(),
        source,
    };

    let resp = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http_err)?;
    let _ = tx.send(DownloadEvent::Started {
        total: resp.content_length(),
    });

    if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await.map_err(io_err)?;
    }
    let mut file = File::create(dest).await.map_err(io_err)?;

    let res = async {
        let mut downloaded = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_err)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            downloaded += chunk.len() as u64;
            let _ = tx.send(DownloadEvent::Progress { downloaded });
        }
        file.flush().await.map_err(io_err)?;
        Ok::<_, Error>(downloaded)
    }
    .await;

    if res.is_err() {
        // a partial image is worse than none
        drop(file);
        let _ = fs::remove_file(dest).await;
    }
    res
}

/// Terminal progress display fed from [`DownloadEvent`]s.
pub struct DownloadProgress {
    pb: ProgressBar,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new_spinner())
    }

    /// No terminal output, for tests and quiet mode.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(pb: ProgressBar) -> Self {
        Self { pb }
    }

    pub fn position(&self) -> u64 {
        self.pb.position()
    }

    pub fn apply(&self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started { total: Some(total) } => {
                self.pb.set_length(*total);
                self.pb.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                        let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                    })
                    .progress_chars("#>-"),
                );
            }
            DownloadEvent::Started { total: None } => {
                self.pb.set_style(
                    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bytes}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
            }
            DownloadEvent::Progress { downloaded } => self.pb.set_position(*downloaded),
            DownloadEvent::Finished { bytes, .. } => {
                self.pb.set_position(*bytes);
                self.pb.finish_with_message("download done");
            }
            DownloadEvent::Failed(_) => self.pb.abandon(),
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Drains the channel into `progress` until the transfer ends.
pub async fn follow(
    mut rx: UnboundedReceiver<DownloadEvent>,
    progress: &DownloadProgress,
) -> Result<PathBuf> {
    while let Some(event) = rx.recv().await {
        progress.apply(&event);
        match event {
            DownloadEvent::Finished { path, .. } => return Ok(path),
            DownloadEvent::Failed(e) => return Err(e),
            _ => {}
        }
    }
    Err(Error::DownloadIo {
        path: PathBuf::new(),
        source: std::io::Error::other("download task ended without a result"),
    })
}
