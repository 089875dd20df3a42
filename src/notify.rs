// src/notify.rs

//! Lifecycle notifications.
//!
//! The manager reports three moments of a transfer (started, completed,
//! failed) through the [`Notifier`] port. Delivery is fire-and-forget: an
//! adapter that cannot deliver drops the event, and nothing it does can hold
//! up or undo a state transition.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::WorkItem;

/// Receives transfer lifecycle events.
///
/// Calls are made from worker tasks outside the state lock. Implementations
/// must return promptly and must not block. A panic inside a call is caught
/// and logged; the transfer's outcome stands.
pub trait Notifier: Send + Sync {
    fn download_started(&self, item: &WorkItem);

    fn download_completed(&self, item: &WorkItem, path: &Path);

    fn download_failed(&self, item: &WorkItem, error: &str);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn download_started(&self, _item: &WorkItem) {}

    fn download_completed(&self, _item: &WorkItem, _path: &Path) {}

    fn download_failed(&self, _item: &WorkItem, _error: &str) {}
}

/// Writes each event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn download_started(&self, item: &WorkItem) {
        tracing::info!(url = %item.url, caption = %item.caption, "download started");
    }

    fn download_completed(&self, item: &WorkItem, path: &Path) {
        tracing::info!(
            url = %item.url,
            caption = %item.caption,
            path = %path.display(),
            "download completed"
        );
    }

    fn download_failed(&self, item: &WorkItem, error: &str) {
        tracing::warn!(url = %item.url, caption = %item.caption, %error, "download failed");
    }
}

/// Owned form of a lifecycle event, for consumers on the other end of a channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started {
        url: String,
        caption: String,
    },
    Completed {
        url: String,
        caption: String,
        path: PathBuf,
    },
    Failed {
        url: String,
        caption: String,
        error: String,
    },
}

impl LifecycleEvent {
    pub fn url(&self) -> &str {
        match self {
            Self::Started { url, .. }
            | Self::Completed { url, .. }
            | Self::Failed { url, .. } => url,
        }
    }
}

/// Forwards events over an unbounded channel, e.g. to a chat-bot uploader task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: LifecycleEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("lifecycle receiver dropped, event discarded");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn download_started(&self, item: &WorkItem) {
        self.send(LifecycleEvent::Started {
            url: item.url.clone(),
            caption: item.caption.clone(),
        });
    }

    fn download_completed(&self, item: &WorkItem, path: &Path) {
        self.send(LifecycleEvent::Completed {
            url: item.url.clone(),
            caption: item.caption.clone(),
            path: path.to_path_buf(),
        });
    }

    fn download_failed(&self, item: &WorkItem, error: &str) {
        self.send(LifecycleEvent::Failed {
            url: item.url.clone(),
            caption: item.caption.clone(),
            error: error.to_string(),
        });
    }
}
