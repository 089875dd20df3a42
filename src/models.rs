// src/models.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority used when a caller does not pick one. Lower values are served first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Priority for interactive requests that should jump the queue.
pub const URGENT_PRIORITY: i32 = 1;

/// Lifecycle of a work item.
///
/// Transitions only move forward (`Queued -> Downloading -> Completed | Failed`),
/// except `Failed -> Queued`, which happens on an explicit retry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Queued,
    Downloading,
    Completed,
    Failed,
}

/// A single download request plus its mutable lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Resource to fetch. Also the key of the active map while in flight.
    pub url: String,
    /// Free-form label, carried through untouched.
    pub caption: String,
    pub priority: i32,
    pub status: ItemStatus,
    /// Percentage in `0.0..=100.0`. Only meaningful while downloading.
    pub progress: f32,
    /// Set only while the item is failed.
    pub error: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(url: impl Into<String>, caption: impl Into<String>, priority: i32) -> Self {
        Self {
            url: url.into(),
            caption: caption.into(),
            priority,
            status: ItemStatus::Queued,
            progress: 0.0,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Moves the item into `Downloading` and stamps `start_time`.
    pub fn mark_downloading(&mut self) {
        self.status = ItemStatus::Downloading;
        self.progress = 0.0;
        self.start_time = Some(Utc::now());
        self.end_time = None;
    }

    /// Records transfer progress. Ignored unless downloading; never moves backwards.
    pub fn set_progress(&mut self, percent: f32) {
        if self.status != ItemStatus::Downloading {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent > self.progress {
            self.progress = percent;
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = ItemStatus::Completed;
        self.progress = 100.0;
        self.end_time = Some(Utc::now());
    }

    /// Progress only means something while downloading, so it drops back to 0.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.progress = 0.0;
        self.error = Some(reason.into());
        self.end_time = Some(Utc::now());
    }

    /// Clears everything an earlier attempt left behind so the item can be queued again.
    pub fn reset_for_retry(&mut self) {
        self.status = ItemStatus::Queued;
        self.progress = 0.0;
        self.error = None;
        self.start_time = None;
        self.end_time = None;
    }
}

/// Point-in-time view of the manager's counters and controls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManagerStatus {
    pub queue_size: usize,
    pub active_count: usize,
    pub failed_count: usize,
    pub paused: bool,
    /// Bytes per second, 0 when unlimited.
    pub bandwidth_limit: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_queued_and_clean() {
        let item = WorkItem::new("http://host/a.bin", "first", DEFAULT_PRIORITY);
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.priority, 5);
        assert_eq!(item.progress, 0.0);
        assert!(item.error.is_none());
        assert!(item.start_time.is_none());
        assert!(item.end_time.is_none());
    }

    #[test]
    fn progress_is_monotonic_and_clamped() {
        let mut item = WorkItem::new("http://host/a.bin", "", DEFAULT_PRIORITY);
        item.set_progress(40.0);
        assert_eq!(item.progress, 0.0, "queued items do not track progress");

        item.mark_downloading();
        item.set_progress(40.0);
        item.set_progress(10.0);
        assert_eq!(item.progress, 40.0);
        item.set_progress(250.0);
        assert_eq!(item.progress, 100.0);
    }

    #[test]
    fn failure_then_retry_clears_attempt_state() {
        let mut item = WorkItem::new("http://host/a.bin", "cap", 3);
        item.mark_downloading();
        item.set_progress(55.0);
        item.mark_failed("connection reset");
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.error.as_deref(), Some("connection reset"));
        assert_eq!(item.progress, 0.0);
        assert!(item.start_time.is_some());
        assert!(item.end_time.is_some());

        item.reset_for_retry();
        assert_eq!(item.status, ItemStatus::Queued);
        assert_eq!(item.progress, 0.0);
        assert!(item.error.is_none());
        assert!(item.start_time.is_none());
        assert!(item.end_time.is_none());
        assert_eq!(item.priority, 3);
        assert_eq!(item.caption, "cap");
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ItemStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
    }
}
