use std::{
    collections::{BinaryHeap, HashSet},
    pin::pin,
};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// An operation that can be scheduled on a [`FlushQueue`].
pub trait QueueItem {
    /// De-duplication key: enqueueing an item whose key is already queued is
    /// a no-op.
    fn key(&self) -> String;

    /// Items with higher priority dequeue first; equal priorities dequeue in
    /// arrival order.
    fn priority(&self) -> i64;
}

/// Priority queue with key de-duplication and drain-on-close semantics.
///
/// `close` wakes blocked consumers. Items still queued at close time are
/// drained before `dequeue` starts returning `None`, and producers may keep
/// enqueueing while the queue drains; that is how failed shutdown flushes
/// re-enter the queue behind the remaining work.
pub struct FlushQueue<T> {
    state: Mutex<State<T>>,
    available: Notify,
}

struct State<T> {
    heap: BinaryHeap<HeapItem<T>>,
    keys: HashSet<String>,
    closing: bool,
    seq: u64,
}

struct HeapItem<T> {
    priority: i64,
    seq: u64,
    key: String,
    item: T,
}

impl<T> PartialEq for HeapItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for HeapItem<T> {}

impl<T> PartialOrd for HeapItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapItem<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T: QueueItem> FlushQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                keys: HashSet::new(),
                closing: false,
                seq: 0,
            }),
            available: Notify::new(),
        }
    }

    /// Add `item` unless an item with the same key is already queued.
    /// Returns whether the item was added.
    pub fn enqueue(&self, item: T) -> bool {
        {
            let mut state = self.state.lock();
            let key = item.key();
            if !state.keys.insert(key.clone()) {
                return false;
            }

            let seq = state.seq;
            state.seq += 1;
            state.heap.push(HeapItem {
                priority: item.priority(),
                seq,
                key,
                item,
            });
        }

        self.available.notify_one();
        true
    }

    /// Take the highest-priority item, waiting for one to arrive.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(entry) = state.heap.pop() {
                    state.keys.remove(&entry.key);
                    return Some(entry.item);
                }
                if state.closing {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop the queue: blocked consumers wake, and once the remaining items
    /// drain, `dequeue` returns `None`.
    pub fn close(&self) {
        self.state.lock().closing = true;
        self.available.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().heap.is_empty()
    }
}

impl<T: QueueItem> Default for FlushQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    struct TestOp {
        key: String,
        priority: i64,
    }

    impl TestOp {
        fn new(key: &str, priority: i64) -> Self {
            Self {
                key: key.to_string(),
                priority,
            }
        }
    }

    impl QueueItem for TestOp {
        fn key(&self) -> String {
            self.key.clone()
        }

        fn priority(&self) -> i64 {
            self.priority
        }
    }

    #[tokio::test]
    async fn test_dequeue_follows_priority_order() {
        let queue = FlushQueue::new();
        queue.enqueue(TestOp::new("a", 1));
        queue.enqueue(TestOp::new("b", 3));
        queue.enqueue(TestOp::new("c", 2));

        assert_eq!(queue.dequeue().await.unwrap().key, "b");
        assert_eq!(queue.dequeue().await.unwrap().key, "c");
        assert_eq!(queue.dequeue().await.unwrap().key, "a");
    }

    #[tokio::test]
    async fn test_equal_priorities_dequeue_in_arrival_order() {
        let queue = FlushQueue::new();
        queue.enqueue(TestOp::new("first", 0));
        queue.enqueue(TestOp::new("second", 0));
        queue.enqueue(TestOp::new("third", 0));

        assert_eq!(queue.dequeue().await.unwrap().key, "first");
        assert_eq!(queue.dequeue().await.unwrap().key, "second");
        assert_eq!(queue.dequeue().await.unwrap().key, "third");
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_by_key() {
        let queue = FlushQueue::new();
        assert!(queue.enqueue(TestOp::new("a", 1)));
        assert!(!queue.enqueue(TestOp::new("a", 5)));
        assert_eq!(queue.len(), 1);

        // Once dequeued the key is free again.
        queue.dequeue().await.unwrap();
        assert!(queue.enqueue(TestOp::new("a", 1)));
    }

    #[tokio::test]
    async fn test_dequeue_blocks_until_enqueue() {
        let queue = std::sync::Arc::new(FlushQueue::<TestOp>::new());

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await.map(|op| op.key) }
        });

        tokio::task::yield_now().await;
        queue.enqueue(TestOp::new("a", 1));

        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer finished")
            .expect("consumer did not panic");
        assert_eq!(got.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumers_with_none() {
        let queue = std::sync::Arc::new(FlushQueue::<TestOp>::new());

        let consumer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.dequeue().await }
        });

        tokio::task::yield_now().await;
        queue.close();

        let got = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .expect("consumer finished")
            .expect("consumer did not panic");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_close_drains_pending_items_first() {
        let queue = FlushQueue::new();
        queue.enqueue(TestOp::new("a", 1));
        queue.enqueue(TestOp::new("b", 2));
        queue.close();

        assert_eq!(queue.dequeue().await.unwrap().key, "b");

        // Retries may still land while the queue drains.
        assert!(queue.enqueue(TestOp::new("c", 0)));

        assert_eq!(queue.dequeue().await.unwrap().key, "a");
        assert_eq!(queue.dequeue().await.unwrap().key, "c");
        assert!(queue.dequeue().await.is_none());
    }
}
