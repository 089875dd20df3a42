// src/manager.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::ManagerConfig;
use crate::downloader::Downloader;
use crate::limiter::SpeedLimiter;
use crate::models::{ManagerStatus, WorkItem};
use crate::notify::Notifier;
use crate::state::{Registry, SharedState};
use crate::worker::run_worker;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to prepare download directory {path}: {source}")]
    DownloadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The public surface of the download queue.
///
/// Construction starts `max_workers` worker tasks which run until
/// [`shutdown`](Self::shutdown) (or until the manager is dropped). All
/// queries return point-in-time snapshots.
pub struct DownloadManager {
    state: Arc<SharedState>,
    limiter: SpeedLimiter,
    max_workers: usize,
    poll_interval: Duration,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Builds the manager and starts its worker pool on the current tokio runtime.
    pub async fn new(
        config: ManagerConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ManagerError> {
        if config.max_workers == 0 {
            return Err(ManagerError::NoWorkers);
        }

        tokio::fs::create_dir_all(&config.download_dir)
            .await
            .map_err(|source| ManagerError::DownloadDir {
                path: config.download_dir.clone(),
                source,
            })?;

        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let limiter = SpeedLimiter::new(config.bandwidth_limit);
        let state = Arc::new(SharedState::new(Registry::new(
            config.bandwidth_limit,
            config.completed_history,
        )));
        let downloader = Arc::new(Downloader::new(
            http_client,
            config.download_dir.clone(),
            limiter.clone(),
            notifier,
        ));

        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();
        for id in 0..config.max_workers {
            tracker.spawn(run_worker(
                id,
                state.clone(),
                downloader.clone(),
                config.poll_interval,
                shutdown.clone(),
            ));
        }
        tracker.close();

        info!(
            workers = config.max_workers,
            bandwidth_limit = config.bandwidth_limit,
            dir = %config.download_dir.display(),
            "download manager initialized"
        );

        Ok(Self {
            state,
            limiter,
            max_workers: config.max_workers,
            poll_interval: config.poll_interval,
            tracker,
            shutdown,
        })
    }

    /// Queues a download. No validation happens here; a bad url fails in the worker.
    pub async fn enqueue(&self, url: impl Into<String>, caption: impl Into<String>, priority: i32) {
        let item = WorkItem::new(url, caption, priority);
        info!(url = %item.url, priority, "added download");
        self.state.lock().await.enqueue(item);
        self.state.wake_all();
    }

    /// Stops workers from starting new items. Transfers in flight keep going.
    pub async fn pause(&self) {
        self.state.lock().await.set_paused(true);
        info!("downloads paused");
    }

    pub async fn resume(&self) {
        self.state.lock().await.set_paused(false);
        self.state.wake_all();
        info!("downloads resumed");
    }

    /// Re-queues a failed item with its original priority.
    ///
    /// Returns whether a failed item matched; an unknown url changes nothing.
    pub async fn retry(&self, url: &str) -> bool {
        let retried = self.state.lock().await.retry(url);
        if retried {
            self.state.wake_all();
            info!(%url, "retrying download");
        } else {
            debug!(%url, "retry ignored, no failed item with this url");
        }
        retried
    }

    /// Sets the global bandwidth limit in bytes per second (0 = unlimited).
    ///
    /// Transfers in flight are throttled to the new rate from their next chunk.
    pub async fn set_bandwidth_limit(&self, bytes_per_sec: u64) {
        // The limiter is updated under the registry lock so the reported limit
        // and the enforced rate cannot diverge between concurrent callers.
        let mut registry = self.state.lock().await;
        registry.set_bandwidth_limit(bytes_per_sec);
        self.limiter.set_rate(bytes_per_sec).await;
        drop(registry);
        info!(bytes_per_sec, "bandwidth limit set");
    }

    pub async fn queue_size(&self) -> usize {
        self.state.lock().await.pending_len()
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active_len()
    }

    pub async fn failed_count(&self) -> usize {
        self.state.lock().await.failed_len()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.is_paused()
    }

    pub async fn current_bandwidth_limit(&self) -> u64 {
        self.state.lock().await.bandwidth_limit()
    }

    /// Counters and controls from a single lock acquisition.
    pub async fn status(&self) -> ManagerStatus {
        self.state.lock().await.status()
    }

    /// Pending items in the order they will be served.
    pub async fn list_pending(&self) -> Vec<WorkItem> {
        self.state.lock().await.pending()
    }

    pub async fn list_active(&self) -> Vec<WorkItem> {
        self.state.lock().await.active()
    }

    pub async fn list_failed(&self) -> Vec<WorkItem> {
        self.state.lock().await.failed()
    }

    /// Most recently completed items, oldest first.
    pub async fn list_completed(&self) -> Vec<WorkItem> {
        self.state.lock().await.completed()
    }

    /// Pending, active and failed items in one list.
    pub async fn list_all(&self) -> Vec<WorkItem> {
        self.state.lock().await.all()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Resolves once nothing is pending or active.
    ///
    /// Never resolves while paused with items pending.
    pub async fn wait_idle(&self) {
        self.state.wait_until(self.poll_interval, Registry::is_idle).await;
    }

    /// Stops every worker loop and waits for them to exit.
    ///
    /// Workers finish the transfer they are running before stopping. Pending
    /// items stay queued. Safe to call more than once.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("shutting down download manager");
        }
        self.shutdown.cancel();
        self.state.wake_all();
        self.tracker.wait().await;
        debug!("all workers stopped");
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use futures_util::future::join_all;

    #[tokio::test]
    async fn concurrent_limit_changes_leave_limiter_and_registry_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            max_workers: 1,
            bandwidth_limit: 0,
            download_dir: dir.path().to_path_buf(),
            ..ManagerConfig::default()
        };
        let manager = DownloadManager::new(config, Arc::new(NoopNotifier)).await.unwrap();

        join_all((1..=50u64).map(|n| manager.set_bandwidth_limit(n * 1_000))).await;

        let reported = manager.current_bandwidth_limit().await;
        assert_eq!(manager.limiter.rate().await, reported);
        manager.shutdown().await;
    }
}
