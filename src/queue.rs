//! # Batch Queue
//!
//! The priority-ordered intake queue between producers and the batch
//! processor. Producers push from arbitrarily many threads; the single
//! worker drains in strict priority order.
//!
//! ## Ordering
//!
//! A max-heap keyed by `(priority desc, arrival seq asc)`: higher priority
//! is always dequeued first, and among equal priorities arrival order wins,
//! so equal-priority traffic is FIFO and starvation-free. The sequence
//! number is assigned under the queue lock, making the tie-break total and
//! deterministic.
//!
//! ## Hand-off
//!
//! The queue holds the items itself, so the worker wake-up is just a
//! [`tokio::sync::Notify`] permit rather than a channel carrying data.
//! Pushes never block and never touch I/O; the worker waits on
//! [`BatchQueue::wait`] with a flush-deadline timeout.
//!
//! After [`BatchQueue::close`], pushes are rejected and the request is
//! handed back to the caller so its callback can still be honored.

use std::collections::BinaryHeap;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::WriteRequest;

// =============================================================================
// Queued Requests
// =============================================================================

/// A write request plus its arrival sequence, ordered for the max-heap.
struct QueuedRequest {
    priority: u8,
    seq: u64,
    request: WriteRequest,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: higher priority first; earlier arrival (smaller seq)
        // wins among equals, hence the reversed seq comparison.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// =============================================================================
// Batch Queue
// =============================================================================

struct QueueInner {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
    closed: bool,
}

/// Priority-ordered intake queue for write requests.
pub struct BatchQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl BatchQueue {
    /// Creates an empty, open queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues a request and wakes the worker.
    ///
    /// On a closed queue the request is returned to the caller unchanged.
    pub fn push(&self, request: WriteRequest) -> Result<(), WriteRequest> {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            if inner.closed {
                return Err(request);
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.heap.push(QueuedRequest {
                priority: request.priority,
                seq,
                request,
            });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Moves up to `max` requests into `out`, highest priority first.
    ///
    /// Returns the number of requests moved.
    pub fn drain_into(&self, out: &mut Vec<WriteRequest>, max: usize) -> usize {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let mut moved = 0;
        while moved < max {
            match inner.heap.pop() {
                Some(item) => {
                    out.push(item.request);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").heap.len()
    }

    /// True if no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops intake: subsequent pushes fail. Wakes the worker so it can
    /// drain the remainder and exit.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue mutex poisoned");
            inner.closed = true;
        }
        self.notify.notify_one();
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").closed
    }

    /// Waits until a push or close wakes the queue.
    ///
    /// The worker bounds this with its flush-deadline timeout.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

impl Default for BatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn request(collection: &str, priority: u8) -> WriteRequest {
        WriteRequest::new(collection, Payload::new()).with_priority(priority)
    }

    fn drain_all(queue: &BatchQueue) -> Vec<WriteRequest> {
        let mut out = Vec::new();
        queue.drain_into(&mut out, usize::MAX);
        out
    }

    #[test]
    fn test_higher_priority_first_regardless_of_arrival() {
        for reversed in [false, true] {
            let queue = BatchQueue::new();
            if reversed {
                queue.push(request("low", 1)).unwrap();
                queue.push(request("high", 5)).unwrap();
            } else {
                queue.push(request("high", 5)).unwrap();
                queue.push(request("low", 1)).unwrap();
            }

            let drained = drain_all(&queue);
            assert_eq!(drained[0].collection.as_str(), "high");
            assert_eq!(drained[1].collection.as_str(), "low");
        }
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let queue = BatchQueue::new();
        queue.push(request("first", 3)).unwrap();
        queue.push(request("second", 3)).unwrap();
        queue.push(request("third", 3)).unwrap();

        let drained = drain_all(&queue);
        let order: Vec<&str> = drained.iter().map(|r| r.collection.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_mixed_priorities() {
        let queue = BatchQueue::new();
        queue.push(request("a", 1)).unwrap();
        queue.push(request("b", 9)).unwrap();
        queue.push(request("c", 5)).unwrap();
        queue.push(request("d", 9)).unwrap();

        let drained = drain_all(&queue);
        let order: Vec<&str> = drained.iter().map(|r| r.collection.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "c", "a"]);
    }

    #[test]
    fn test_drain_respects_max() {
        let queue = BatchQueue::new();
        for i in 0..5 {
            queue.push(request(&format!("c{i}"), 1)).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(queue.drain_into(&mut out, 3), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_closed_queue_rejects_and_returns_request() {
        let queue = BatchQueue::new();
        queue.close();

        let rejected = queue.push(request("events", 1)).unwrap_err();
        assert_eq!(rejected.collection.as_str(), "events");
        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_close_preserves_queued_items() {
        let queue = BatchQueue::new();
        queue.push(request("events", 1)).unwrap();
        queue.close();

        assert_eq!(queue.len(), 1, "close stops intake, not drain");
    }
}
