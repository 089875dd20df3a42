// src/downloader.rs

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::limiter::SpeedLimiter;
use crate::models::WorkItem;
use crate::notify::Notifier;
use crate::state::SharedState;

/// Why a transfer failed. The `Display` text becomes the item's `error`.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("transfer incomplete: received {received} of {expected} bytes")]
    Incomplete { expected: u64, received: u64 },
}

/// File name used when the url path has no usable last segment.
const FALLBACK_FILE_NAME: &str = "download";

/// Suffix of the files bytes land in until the transfer succeeds.
pub const PARTIAL_SUFFIX: &str = ".odm-part";

/// Derives the local file name from the last path segment of `url`.
pub fn file_name_for(url: &str) -> Result<String, DownloadError> {
    let parsed =
        url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .unwrap_or(FALLBACK_FILE_NAME);
    Ok(name.to_string())
}

/// Creates a uniquely named `<name>.XXXXXX.odm-part` file in `dir`.
///
/// Each transfer owns its own partial file, so two transfers heading for the
/// same destination never write through the same inode. The file is removed
/// when the returned handle is dropped without being persisted.
pub fn create_partial(dir: &Path, file_name: &str) -> std::io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(&format!("{file_name}."))
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(dir)
}

/// Performs one transfer per call and settles the item's outcome in the registry.
pub struct Downloader {
    client: Client,
    download_dir: PathBuf,
    limiter: SpeedLimiter,
    notifier: Arc<dyn Notifier>,
}

impl Downloader {
    pub fn new(
        client: Client,
        download_dir: PathBuf,
        limiter: SpeedLimiter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            download_dir,
            limiter,
            notifier,
        }
    }

    /// Runs the transfer for an item the worker has just moved into the active map.
    ///
    /// Every outcome ends with the url gone from the active map: completed
    /// items are dropped (or kept in history), failures go to the failed list.
    /// Errors never escape this call, and neither do notifier panics.
    pub async fn execute(&self, state: &SharedState, item: WorkItem) {
        self.notify(&item.url, "started", |n| n.download_started(&item));

        match self.transfer(state, &item.url).await {
            Ok(path) => {
                let done = state.lock().await.complete(&item.url);
                if let Some(done) = done {
                    info!(url = %done.url, path = %path.display(), "transfer completed");
                    self.notify(&done.url, "completed", |n| n.download_completed(&done, &path));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                let failed = state.lock().await.fail(&item.url, reason.clone());
                if let Some(failed) = failed {
                    warn!(url = %failed.url, error = %reason, "transfer failed");
                    self.notify(&failed.url, "failed", |n| n.download_failed(&failed, &reason));
                }
            }
        }

        state.wake_all();
    }

    /// Calls into the notifier; a panicking adapter is logged and ignored.
    fn notify(&self, url: &str, event: &'static str, call: impl FnOnce(&dyn Notifier)) {
        let notifier = &*self.notifier;
        if panic::catch_unwind(AssertUnwindSafe(|| call(notifier))).is_err() {
            warn!(%url, event, "notifier panicked");
        }
    }

    async fn transfer(&self, state: &SharedState, url: &str) -> Result<PathBuf, DownloadError> {
        let file_name = file_name_for(url)?;
        let destination = self.download_dir.join(&file_name);
        tokio::fs::create_dir_all(&self.download_dir).await?;

        let (std_file, partial) = create_partial(&self.download_dir, &file_name)?.into_parts();
        let mut file = File::from_std(std_file);

        match self.stream_to(state, url, &mut file).await {
            Ok(()) => {
                drop(file);
                partial.persist(&destination).map_err(|e| e.error)?;
                Ok(destination)
            }
            Err(e) => {
                debug!(path = %partial.display(), "removing partial file");
                drop(file);
                // Dropping the handle deletes the partial file.
                drop(partial);
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        state: &SharedState,
        url: &str,
        file: &mut File,
    ) -> Result<(), DownloadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status.as_u16()));
        }

        let total = response.content_length().filter(|len| *len > 0);
        debug!(%url, ?total, "response received");

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        let mut reported: f32 = 0.0;

        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            self.limiter.take(bytes.len() as u64).await;
            file.write_all(&bytes).await?;
            received += bytes.len() as u64;

            if let Some(total) = total {
                let percent = ((received as f64 / total as f64) * 100.0).min(100.0) as f32;
                // Only take the lock once per whole percent.
                if percent - reported >= 1.0 || percent >= 100.0 {
                    reported = percent;
                    state.lock().await.update_progress(url, percent);
                }
            }
        }
        file.flush().await?;

        if let Some(expected) = total {
            if received < expected {
                return Err(DownloadError::Incomplete { expected, received });
            }
        }
        Ok(())
    }
}
