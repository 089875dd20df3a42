// src/worker.rs

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::downloader::Downloader;
use crate::state::SharedState;

/// One long-lived worker loop.
///
/// Each pass does a bounded dequeue (which also covers the paused case, as a
/// paused registry hands out nothing) and runs at most one transfer. The loop
/// only ends when `shutdown` fires; a transfer in progress is always finished
/// first.
pub(crate) async fn run_worker(
    id: usize,
    state: Arc<SharedState>,
    downloader: Arc<Downloader>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    debug!(worker = id, "worker started");
    loop {
        // `next_item` moves an item into the active map without awaiting in
        // between, so dropping it here never loses a dequeued item.
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = state.next_item(poll_interval) => next,
        };

        if let Some(item) = next {
            debug!(worker = id, url = %item.url, "picked up item");
            downloader.execute(&state, item).await;
        }
    }
    debug!(worker = id, "worker stopped");
}
