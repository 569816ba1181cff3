//! Bounded blocking FIFO used for every cross-thread handoff.
//!
//! A queue has a fixed capacity and one of two overflow policies:
//!
//! - [`OverflowPolicy::Block`]: `put` waits until a slot frees up. Used for
//!   engine command queues, where nothing may be lost.
//! - [`OverflowPolicy::FailFast`]: `put` returns [`QueueError::Full`] right away.
//!   Used for fire-and-forget trace queues.
//!
//! Consumers wait on a condition variable and never poll.

use crate::error::BridgeError;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default number of slots for command queues.
pub const DEFAULT_CAPACITY: usize = 16;

/// What `put` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until space becomes available.
    #[default]
    Block,
    /// Reject the item immediately.
    FailFast,
}

/// Queue operation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The queue is full and the policy is [`OverflowPolicy::FailFast`].
    #[error("queue is full")]
    Full,
    /// The queue was reset while the caller was waiting.
    #[error("queue was reset")]
    Reset,
}

impl From<QueueError> for BridgeError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => Self::QueueFull,
            QueueError::Reset => Self::ConnectionInterrupted,
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    /// Bumped by `reset` so sleeping consumers can tell they were cancelled.
    epoch: u64,
}

/// A bounded multi-producer FIFO.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                epoch: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `item`, honouring the overflow policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when the queue is full and fails fast.
    pub fn put(&self, item: T) -> Result<(), QueueError> {
        let mut inner = self.lock();
        while inner.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::FailFast => return Err(QueueError::Full),
                OverflowPolicy::Block => {
                    inner = self
                        .not_full
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends `item` without ever blocking, whatever the policy.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when there is no free slot.
    pub fn try_put(&self, item: T) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if inner.items.len() >= self.capacity {
            return Err(QueueError::Full);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// A zero `timeout` waits indefinitely. `Ok(None)` means the wait timed out.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Reset`] if [`reset`](Self::reset) ran while waiting.
    pub fn get(&self, timeout: Duration) -> Result<Option<T>, QueueError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut inner = self.lock();
        let epoch = inner.epoch;
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if inner.epoch != epoch {
                return Err(QueueError::Reset);
            }
            inner = match deadline {
                None => self
                    .not_empty
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    self.not_empty
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Removes the oldest item if there is one.
    pub fn try_get(&self) -> Option<T> {
        let item = self.lock().items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Drops every pending item and wakes all waiters.
    ///
    /// Consumers blocked in [`get`](Self::get) return [`QueueError::Reset`];
    /// producers blocked in [`put`](Self::put) find free space and proceed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.epoch = inner.epoch.wrapping_add(1);
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The overflow policy chosen at construction.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preserves_submission_order() {
        let queue = BoundedQueue::new(4, OverflowPolicy::Block);
        for i in 0..4 {
            queue.put(i).unwrap();
        }
        let drained: Vec<_> = (0..4)
            .map(|_| queue.get(Duration::from_millis(10)).unwrap().unwrap())
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
    }

    #[test]
    fn fail_fast_rejects_when_full() {
        let queue = BoundedQueue::new(2, OverflowPolicy::FailFast);
        queue.put("a").unwrap();
        queue.put("b").unwrap();
        assert_eq!(queue.put("c"), Err(QueueError::Full));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn get_times_out_without_error() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1, OverflowPolicy::Block);
        let start = Instant::now();
        assert_eq!(queue.get(Duration::from_millis(30)), Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn blocking_put_waits_for_consumer() {
        let queue = Arc::new(BoundedQueue::new(1, OverflowPolicy::Block));
        queue.put(1).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(2))
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.get(Duration::ZERO), Ok(Some(1)));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.get(Duration::ZERO), Ok(Some(2)));
    }

    #[test]
    fn zero_timeout_waits_until_item_arrives() {
        let queue = Arc::new(BoundedQueue::new(1, OverflowPolicy::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(20));
        queue.put("late").unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(Some("late")));
    }

    #[test]
    fn reset_drains_and_wakes_waiters() {
        let queue = Arc::new(BoundedQueue::<u32>::new(2, OverflowPolicy::Block));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.get(Duration::ZERO))
        };
        thread::sleep(Duration::from_millis(20));
        queue.reset();
        assert_eq!(consumer.join().unwrap(), Err(QueueError::Reset));

        queue.put(7).unwrap();
        queue.put(8).unwrap();
        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn many_producers_one_consumer() {
        let queue = Arc::new(BoundedQueue::new(4, OverflowPolicy::Block));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..25 {
                        queue.put(p * 100 + i).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 100 {
            if let Some(item) = queue.get(Duration::from_secs(5)).unwrap() {
                seen.push(item);
            }
        }
        for producer in producers {
            producer.join().unwrap();
        }

        // Each producer's items arrive in the order it submitted them.
        for p in 0..4 {
            let own: Vec<_> = seen.iter().filter(|v| **v / 100 == p).copied().collect();
            let expected: Vec<_> = (0..25).map(|i| p * 100 + i).collect();
            assert_eq!(own, expected);
        }
    }
}
