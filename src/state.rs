// src/state.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard, Notify};

use crate::downloader::file_name_for;
use crate::models::{ManagerStatus, WorkItem};
use crate::queue::PriorityQueue;

/// Everything the manager tracks, guarded as one unit.
///
/// An item lives in at most one of `pending`, `active` or `failed` at a time.
/// Completed items leave all three; the most recent ones are kept in a
/// bounded history that is not part of that accounting.
#[derive(Debug)]
pub struct Registry {
    pending: PriorityQueue,
    active: HashMap<String, WorkItem>,
    failed: Vec<WorkItem>,
    completed: VecDeque<WorkItem>,
    completed_limit: usize,
    paused: bool,
    bandwidth_limit: u64,
}

impl Registry {
    pub fn new(bandwidth_limit: u64, completed_limit: usize) -> Self {
        Self {
            pending: PriorityQueue::new(),
            active: HashMap::new(),
            failed: Vec::new(),
            completed: VecDeque::new(),
            completed_limit,
            paused: false,
            bandwidth_limit,
        }
    }

    pub fn enqueue(&mut self, item: WorkItem) {
        self.pending.push(item);
    }

    /// Moves the next eligible pending item into the active map.
    ///
    /// Returns `None` while paused. Items whose url is already in flight, or
    /// whose destination file name is being written by another transfer, are
    /// left pending in place.
    pub fn start_next(&mut self) -> Option<WorkItem> {
        if self.paused {
            return None;
        }
        let active = &self.active;
        let busy_names: HashSet<String> =
            active.keys().filter_map(|url| file_name_for(url).ok()).collect();
        let mut item = self.pending.pop_where(|item| {
            !active.contains_key(&item.url)
                && file_name_for(&item.url).map_or(true, |name| !busy_names.contains(&name))
        })?;
        item.mark_downloading();
        self.active.insert(item.url.clone(), item.clone());
        Some(item)
    }

    pub fn update_progress(&mut self, url: &str, percent: f32) {
        if let Some(item) = self.active.get_mut(url) {
            item.set_progress(percent);
        }
    }

    /// Takes `url` out of the active map as completed.
    pub fn complete(&mut self, url: &str) -> Option<WorkItem> {
        let Some(mut item) = self.active.remove(url) else {
            tracing::error!(%url, "completion reported for a url that is not active");
            return None;
        };
        item.mark_completed();
        if self.completed_limit > 0 {
            if self.completed.len() == self.completed_limit {
                self.completed.pop_front();
            }
            self.completed.push_back(item.clone());
        }
        Some(item)
    }

    /// Moves `url` from the active map to the failed list.
    pub fn fail(&mut self, url: &str, reason: impl Into<String>) -> Option<WorkItem> {
        let Some(mut item) = self.active.remove(url) else {
            tracing::error!(%url, "failure reported for a url that is not active");
            return None;
        };
        item.mark_failed(reason);
        self.failed.push(item.clone());
        Some(item)
    }

    /// Re-queues the first failed item matching `url`. Returns false when none matched.
    pub fn retry(&mut self, url: &str) -> bool {
        let Some(index) = self.failed.iter().position(|item| item.url == url) else {
            return false;
        };
        let mut item = self.failed.remove(index);
        item.reset_for_retry();
        self.pending.push(item);
        true
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_bandwidth_limit(&mut self, bytes_per_sec: u64) {
        self.bandwidth_limit = bytes_per_sec;
    }

    pub fn bandwidth_limit(&self) -> u64 {
        self.bandwidth_limit
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            queue_size: self.pending.len(),
            active_count: self.active.len(),
            failed_count: self.failed.len(),
            paused: self.paused,
            bandwidth_limit: self.bandwidth_limit,
        }
    }

    pub fn pending(&mut self) -> Vec<WorkItem> {
        self.pending.snapshot()
    }

    /// Active items, oldest transfer first.
    pub fn active(&self) -> Vec<WorkItem> {
        let mut items: Vec<_> = self.active.values().cloned().collect();
        items.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.url.cmp(&b.url)));
        items
    }

    pub fn failed(&self) -> Vec<WorkItem> {
        self.failed.clone()
    }

    pub fn completed(&self) -> Vec<WorkItem> {
        self.completed.iter().cloned().collect()
    }

    /// Pending, then active, then failed.
    pub fn all(&mut self) -> Vec<WorkItem> {
        let mut items = self.pending();
        items.extend(self.active());
        items.extend(self.failed.iter().cloned());
        items
    }

    #[cfg(test)]
    fn is_consistent(&mut self) -> bool {
        use crate::models::ItemStatus;
        let pending = self.pending.snapshot();
        let in_pending = |url: &str| pending.iter().any(|i| i.url == url);
        self.active
            .iter()
            .all(|(url, item)| item.status == ItemStatus::Downloading && !in_pending(url))
            && self.failed.iter().all(|item| item.status == ItemStatus::Failed)
            && pending.iter().all(|item| item.status == ItemStatus::Queued)
    }
}

/// The registry behind its single lock, plus the signal workers sleep on.
#[derive(Debug)]
pub struct SharedState {
    registry: Mutex<Registry>,
    wake: Notify,
}

impl SharedState {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Mutex::new(registry),
            wake: Notify::new(),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().await
    }

    /// Wakes every task parked in [`next_item`](Self::next_item) or
    /// [`wait_until`](Self::wait_until).
    pub fn wake_all(&self) {
        self.wake.notify_waiters();
    }

    /// Bounded dequeue.
    ///
    /// Tries to start the next item; if nothing is eligible (empty, paused, or
    /// only busy urls) it parks until woken or `wait` elapses, tries once more,
    /// and returns `None` if there is still nothing to do.
    pub async fn next_item(&self, wait: Duration) -> Option<WorkItem> {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(item) = self.registry.lock().await.start_next() {
            return Some(item);
        }
        let _ = tokio::time::timeout(wait, notified).await;
        self.registry.lock().await.start_next()
    }

    /// Resolves once `done` holds for the registry, re-checking on every wake
    /// and at least every `poll`.
    pub async fn wait_until(&self, poll: Duration, mut done: impl FnMut(&Registry) -> bool) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done(&*self.registry.lock().await) {
                return;
            }
            let _ = tokio::time::timeout(poll, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemStatus;
    use std::sync::Arc;

    fn registry() -> Registry {
        Registry::new(0, 2)
    }

    fn item(url: &str, priority: i32) -> WorkItem {
        WorkItem::new(url, "", priority)
    }

    #[test]
    fn start_next_moves_item_to_active() {
        let mut reg = registry();
        reg.enqueue(item("a", 5));
        let started = reg.start_next().unwrap();
        assert_eq!(started.status, ItemStatus::Downloading);
        assert!(started.start_time.is_some());
        assert_eq!(reg.pending_len(), 0);
        assert_eq!(reg.active_len(), 1);
        assert!(reg.is_consistent());
    }

    #[test]
    fn paused_registry_starts_nothing() {
        let mut reg = registry();
        reg.enqueue(item("a", 5));
        reg.set_paused(true);
        reg.set_paused(true);
        assert!(reg.start_next().is_none());
        assert_eq!(reg.pending_len(), 1);
        assert_eq!(reg.active_len(), 0);

        reg.set_paused(false);
        assert!(reg.start_next().is_some());
    }

    #[test]
    fn duplicate_url_waits_for_inflight_copy() {
        let mut reg = registry();
        reg.enqueue(item("dup", 1));
        reg.enqueue(item("dup", 1));
        reg.enqueue(item("other", 5));

        assert_eq!(reg.start_next().unwrap().url, "dup");
        assert_eq!(reg.start_next().unwrap().url, "other");
        assert!(reg.start_next().is_none());
        assert_eq!(reg.pending_len(), 1);
        assert!(reg.is_consistent());

        reg.complete("dup").unwrap();
        assert_eq!(reg.start_next().unwrap().url, "dup");
    }

    #[test]
    fn same_destination_name_waits_for_inflight_transfer() {
        let mut reg = registry();
        reg.enqueue(item("http://h/x/file.bin", 1));
        reg.enqueue(item("http://h/y/file.bin", 1));
        reg.enqueue(item("http://h/z/other.bin", 5));

        assert_eq!(reg.start_next().unwrap().url, "http://h/x/file.bin");
        assert_eq!(reg.start_next().unwrap().url, "http://h/z/other.bin");
        assert!(reg.start_next().is_none());
        assert_eq!(reg.pending_len(), 1);

        reg.fail("http://h/x/file.bin", "gone");
        assert_eq!(reg.start_next().unwrap().url, "http://h/y/file.bin");
        assert!(reg.is_consistent());
    }

    #[test]
    fn failure_moves_item_to_failed_list() {
        let mut reg = registry();
        reg.enqueue(item("a", 5));
        reg.start_next().unwrap();
        reg.update_progress("a", 30.0);

        let failed = reg.fail("a", "stream interrupted").unwrap();
        assert_eq!(failed.error.as_deref(), Some("stream interrupted"));
        assert_eq!(failed.progress, 0.0);
        assert_eq!(reg.failed()[0].progress, 0.0);
        assert_eq!(reg.active_len(), 0);
        assert_eq!(reg.failed_len(), 1);
        assert!(reg.is_consistent());
    }

    #[test]
    fn retry_requeues_with_clean_state() {
        let mut reg = registry();
        reg.set_paused(false);
        reg.enqueue(item("a", 3));
        reg.start_next().unwrap();
        reg.update_progress("a", 80.0);
        reg.fail("a", "boom");

        assert!(reg.retry("a"));
        assert_eq!(reg.failed_len(), 0);
        assert_eq!(reg.pending_len(), 1);
        let pending = reg.pending();
        assert_eq!(pending[0].priority, 3);
        assert_eq!(pending[0].progress, 0.0);
        assert!(pending[0].error.is_none());
        assert!(reg.is_consistent());
    }

    #[test]
    fn retry_of_unknown_url_changes_nothing() {
        let mut reg = registry();
        reg.enqueue(item("queued", 5));
        assert!(!reg.retry("queued"));
        assert!(!reg.retry("missing"));
        assert_eq!(reg.pending_len(), 1);
        assert_eq!(reg.failed_len(), 0);
    }

    #[test]
    fn completed_history_is_bounded() {
        let mut reg = registry();
        for url in ["a", "b", "c"] {
            reg.enqueue(item(url, 5));
            reg.start_next().unwrap();
            reg.complete(url).unwrap();
        }
        let urls: Vec<_> = reg.completed().into_iter().map(|i| i.url).collect();
        assert_eq!(urls, ["b", "c"]);
        assert!(reg.is_idle());
        assert_eq!(reg.failed_len(), 0);
    }

    #[test]
    fn zero_history_drops_completed_items() {
        let mut reg = Registry::new(0, 0);
        reg.enqueue(item("a", 5));
        reg.start_next().unwrap();
        assert_eq!(reg.complete("a").unwrap().status, ItemStatus::Completed);
        assert!(reg.completed().is_empty());
    }

    #[test]
    fn completing_unknown_url_is_reported_not_panicking() {
        let mut reg = registry();
        assert!(reg.complete("ghost").is_none());
        assert!(reg.fail("ghost", "x").is_none());
        assert_eq!(reg.failed_len(), 0);
    }

    #[test]
    fn all_lists_every_collection() {
        let mut reg = registry();
        reg.enqueue(item("f", 1));
        reg.start_next().unwrap();
        reg.fail("f", "nope");
        reg.enqueue(item("a", 1));
        reg.start_next().unwrap();
        reg.enqueue(item("p", 5));

        let all: Vec<_> = reg.all().into_iter().map(|i| (i.url, i.status)).collect();
        assert_eq!(
            all,
            [
                ("p".to_string(), ItemStatus::Queued),
                ("a".to_string(), ItemStatus::Downloading),
                ("f".to_string(), ItemStatus::Failed),
            ]
        );
        let status = reg.status();
        assert_eq!((status.queue_size, status.active_count, status.failed_count), (1, 1, 1));
    }

    #[tokio::test]
    async fn next_item_times_out_on_empty_registry() {
        let shared = SharedState::new(registry());
        let started = tokio::time::Instant::now();
        assert!(shared.next_item(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn next_item_wakes_on_enqueue() {
        let shared = Arc::new(SharedState::new(registry()));
        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.next_item(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        shared.lock().await.enqueue(item("late", 5));
        shared.wake_all();

        let got = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake before its own timeout")
            .unwrap();
        assert_eq!(got.unwrap().url, "late");
    }
}
