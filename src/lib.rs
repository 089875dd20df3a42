// src/lib.rs

pub mod config;
pub mod downloader;
pub mod limiter;
pub mod logging;
pub mod manager;
pub mod models;
pub mod notify;
pub mod queue;
pub mod state;
pub mod store;
mod worker;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::config::{Config, ManagerConfig};
    pub use crate::downloader::DownloadError;
    pub use crate::manager::{DownloadManager, ManagerError};
    pub use crate::models::{ItemStatus, ManagerStatus, WorkItem, DEFAULT_PRIORITY, URGENT_PRIORITY};
    pub use crate::notify::{ChannelNotifier, LifecycleEvent, LogNotifier, NoopNotifier, Notifier};
    pub use crate::store::{QueueRecord, QueueStore};
}
