// src/queue.rs

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::models::WorkItem;

/// Heap entry. `seq` is the arrival stamp used to keep equal priorities FIFO.
#[derive(Debug)]
struct Entry {
    priority: i32,
    seq: u64,
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // `BinaryHeap` is a max-heap, so both keys are reversed.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending work ordered by priority (lowest value first), then by arrival.
///
/// The queue itself is not synchronized; it lives inside the manager's
/// registry and is only touched while that lock is held.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an item using its own `priority` field.
    pub fn push(&mut self, item: WorkItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            priority: item.priority,
            seq,
            item,
        });
    }

    /// Removes and returns the item that should be served next.
    pub fn pop(&mut self) -> Option<WorkItem> {
        self.heap.pop().map(|entry| entry.item)
    }

    /// Like [`pop`](Self::pop), but skips items rejected by `eligible`.
    ///
    /// Skipped items go back with their original arrival stamp, so they keep
    /// their place in line.
    pub fn pop_where(&mut self, mut eligible: impl FnMut(&WorkItem) -> bool) -> Option<WorkItem> {
        let mut skipped = Vec::new();
        let mut found = None;
        while let Some(entry) = self.heap.pop() {
            if eligible(&entry.item) {
                found = Some(entry.item);
                break;
            }
            skipped.push(entry);
        }
        self.heap.extend(skipped);
        found
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Lists pending items in service order without consuming them.
    ///
    /// Drains the heap and restores every entry untouched, so ordering and
    /// arrival stamps survive the listing.
    pub fn snapshot(&mut self) -> Vec<WorkItem> {
        let mut drained = Vec::with_capacity(self.heap.len());
        while let Some(entry) = self.heap.pop() {
            drained.push(entry);
        }
        let items = drained.iter().map(|entry| entry.item.clone()).collect();
        self.heap.extend(drained);
        items
    }
}
