use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of schedulable work: one account to review.
///
/// Lower `priority` values are more urgent. `last_processed` is `None` for
/// accounts never reviewed before, which sorts them ahead of previously
/// reviewed accounts at equal priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub priority: i32,
    pub last_processed: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            priority,
            last_processed: None,
        }
    }
}

/// Heap entry: ordering key is (priority, last_processed, insertion seq).
///
/// The trailing sequence number makes ties stable: two items with the same
/// priority and timestamp dequeue in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedItem {
    priority: i32,
    last_processed: Option<DateTime<Utc>>,
    seq: u64,
    item: WorkItem,
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.priority, self.last_processed, self.seq).cmp(&(
            other.priority,
            other.last_processed,
            other.seq,
        ))
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of pending work items.
///
/// Backed by a binary min-heap. An item id may be queued at most once at a
/// time; a duplicate `enqueue` is rejected rather than double-scheduled.
#[derive(Debug, Default)]
pub struct WorkQueue {
    heap: BinaryHeap<Reverse<QueuedItem>>,
    queued_ids: HashSet<String>,
    next_seq: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item to the queue. Returns `false` if an item with the same id
    /// is already queued (the new one is dropped).
    pub fn enqueue(&mut self, item: WorkItem) -> bool {
        if !self.queued_ids.insert(item.id.clone()) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedItem {
            priority: item.priority,
            last_processed: item.last_processed,
            seq,
            item,
        }));
        true
    }

    /// Remove and return up to `n` items in priority order.
    ///
    /// An empty queue yields an empty batch, not an error.
    pub fn dequeue_batch(&mut self, n: usize) -> Vec<WorkItem> {
        let mut batch = Vec::with_capacity(n.min(self.heap.len()));
        while batch.len() < n {
            match self.heap.pop() {
                Some(Reverse(entry)) => {
                    self.queued_ids.remove(&entry.item.id);
                    batch.push(entry.item);
                }
                None => break,
            }
        }
        batch
    }

    /// The most urgent item without removing it.
    pub fn peek(&self) -> Option<&WorkItem> {
        self.heap.peek().map(|Reverse(entry)| &entry.item)
    }

    /// Change the priority of a queued item. A no-op if the id is not queued.
    ///
    /// Rebuilds the heap; the item keeps its original insertion order among
    /// new ties.
    pub fn update_priority(&mut self, id: &str, new_priority: i32) {
        if !self.queued_ids.contains(id) {
            return;
        }
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        for Reverse(entry) in &mut entries {
            if entry.item.id == id {
                entry.priority = new_priority;
                entry.item.priority = new_priority;
            }
        }
        self.heap = BinaryHeap::from(entries);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn drain_ids(queue: &mut WorkQueue) -> Vec<String> {
        let mut ids = Vec::new();
        loop {
            let batch = queue.dequeue_batch(1);
            match batch.into_iter().next() {
                Some(item) => ids.push(item.id),
                None => break,
            }
        }
        ids
    }

    #[test]
    fn dequeue_follows_priority_order() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkItem::new("c", 7));
        queue.enqueue(WorkItem::new("a", 1));
        queue.enqueue(WorkItem::new("b", 4));

        assert_eq!(drain_ids(&mut queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_priority_ties_break_by_insertion_order() {
        // Priorities [5,1,3,1,9,2,2,2,0,4]; equal priorities must come out
        // in the order they went in.
        let priorities = [5, 1, 3, 1, 9, 2, 2, 2, 0, 4];
        let mut queue = WorkQueue::new();
        for (i, p) in priorities.iter().enumerate() {
            queue.enqueue(WorkItem::new(format!("acct-{i}"), *p));
        }

        let batch = queue.dequeue_batch(10);
        let got: Vec<(i32, String)> = batch.into_iter().map(|i| (i.priority, i.id)).collect();
        assert_eq!(
            got,
            vec![
                (0, "acct-8".to_string()),
                (1, "acct-1".to_string()),
                (1, "acct-3".to_string()),
                (2, "acct-5".to_string()),
                (2, "acct-6".to_string()),
                (2, "acct-7".to_string()),
                (3, "acct-2".to_string()),
                (4, "acct-9".to_string()),
                (5, "acct-0".to_string()),
                (9, "acct-4".to_string()),
            ]
        );
    }

    #[test]
    fn never_processed_sorts_before_processed_at_equal_priority() {
        let mut queue = WorkQueue::new();
        let mut old = WorkItem::new("reviewed", 3);
        old.last_processed = Some(Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap());
        queue.enqueue(old);
        queue.enqueue(WorkItem::new("fresh", 3));

        assert_eq!(drain_ids(&mut queue), vec!["fresh", "reviewed"]);
    }

    #[test]
    fn older_last_processed_dequeues_first() {
        let mut queue = WorkQueue::new();
        let mut recent = WorkItem::new("recent", 2);
        recent.last_processed = Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        let mut stale = WorkItem::new("stale", 2);
        stale.last_processed = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        queue.enqueue(recent);
        queue.enqueue(stale);

        assert_eq!(drain_ids(&mut queue), vec!["stale", "recent"]);
    }

    #[test]
    fn dequeue_from_empty_returns_empty_batch() {
        let mut queue = WorkQueue::new();
        assert!(queue.dequeue_batch(5).is_empty());
    }

    #[test]
    fn dequeue_batch_caps_at_queue_size() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkItem::new("a", 1));
        queue.enqueue(WorkItem::new("b", 2));

        let batch = queue.dequeue_batch(10);
        assert_eq!(batch.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicate_enqueue_is_rejected() {
        let mut queue = WorkQueue::new();
        assert!(queue.enqueue(WorkItem::new("a", 1)));
        assert!(!queue.enqueue(WorkItem::new("a", 9)));
        assert_eq!(queue.len(), 1);

        // After dequeue the id may be enqueued again.
        queue.dequeue_batch(1);
        assert!(queue.enqueue(WorkItem::new("a", 2)));
    }

    #[test]
    fn peek_does_not_remove() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkItem::new("a", 1));
        assert_eq!(queue.peek().map(|i| i.id.as_str()), Some("a"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn update_priority_reorders_queue() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkItem::new("a", 5));
        queue.enqueue(WorkItem::new("b", 3));

        queue.update_priority("a", 0);
        let batch = queue.dequeue_batch(2);
        assert_eq!(batch[0].id, "a");
        assert_eq!(batch[0].priority, 0);
        assert_eq!(batch[1].id, "b");
    }

    #[test]
    fn update_priority_on_missing_id_is_noop() {
        let mut queue = WorkQueue::new();
        queue.enqueue(WorkItem::new("a", 5));
        queue.update_priority("ghost", 0);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek().unwrap().priority, 5);
    }
}
