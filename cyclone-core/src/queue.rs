//! `SharedTaskQueue` / `SharedResultQueue` (spec §4.2): a bounded, FIFO,
//! multi-producer/multi-consumer queue guarded by a mutex and a non-empty
//! condition variable. Modeled on `roboplc::pchannel`'s `Mutex` + `Condvar`
//! channel, simplified to plain FIFO (no delivery-policy coalescing, which
//! that channel offers but this system's at-most-one-assignment invariant
//! does not need).

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// The queue's protected state, reachable only through a [`MutexGuard`]
/// obtained from [`Queue::lock`] (spec §4.2 "exposed lock").
pub struct Inner<T> {
    data: VecDeque<T>,
    capacity: usize,
}

/// A bounded FIFO queue shared between producer(s) and consumer(s) via a
/// mutex and a non-empty condition variable (spec §4.2/§4.8).
pub struct Queue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> Queue<T> {
    /// Creates a new bounded queue
    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends `value`, signaling the non-empty condition. Returns
    /// [`Error::QueueFull`] if the queue is already at capacity.
    pub fn push(&self, value: T) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.data.len() >= inner.capacity {
            return Err(Error::QueueFull);
        }
        inner.data.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available, then pops it FIFO.
    pub fn pop_blocking(&self) -> T {
        let mut inner = self.inner.lock();
        loop {
            if let Some(value) = inner.data.pop_front() {
                return value;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Tries to acquire the queue's lock within `timeout` and pop one item
    /// if present. Returns `Ok(None)` both when the lock was acquired but
    /// the queue was empty, and distinguishes that from a failed
    /// acquisition via `Err(Error::Timeout)` — callers (the master dispatch
    /// loop) must check which happened, per spec §4.2/§4.8: "any consumer
    /// must check whether acquisition succeeded before operating on the
    /// protected state."
    pub fn try_pop(&self, timeout: Duration) -> Result<Option<T>> {
        match self.inner.try_lock_for(timeout) {
            Some(mut inner) => Ok(inner.data.pop_front()),
            None => Err(Error::Timeout),
        }
    }

    /// True if the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().data.is_empty()
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.inner.lock().data.len()
    }

    /// Exposes the queue's lock for a coalesced, multi-step critical
    /// section (spec §4.2: "exposed lock").
    pub fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock()
    }
}

impl<T> Inner<T> {
    /// Pops one item while already holding the lock from [`Queue::lock`].
    pub fn pop_front(&mut self) -> Option<T> {
        self.data.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let q = Queue::bounded(8);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.push(3).unwrap();
        assert_eq!(q.pop_blocking(), 1);
        assert_eq!(q.pop_blocking(), 2);
        assert_eq!(q.pop_blocking(), 3);
    }

    #[test]
    fn push_past_capacity_fails() {
        let q: Queue<i32> = Queue::bounded(2);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert!(matches!(q.push(3), Err(Error::QueueFull)));
    }

    #[test]
    fn try_pop_returns_none_on_empty_queue() {
        let q: Queue<i32> = Queue::bounded(4);
        assert_eq!(q.try_pop(Duration::from_millis(50)).unwrap(), None);
    }

    #[test]
    fn try_pop_returns_item_when_present() {
        let q = Queue::bounded(4);
        q.push(42).unwrap();
        assert_eq!(q.try_pop(Duration::from_millis(50)).unwrap(), Some(42));
    }

    #[test]
    fn pop_blocking_wakes_on_push_from_another_thread() {
        let q = Arc::new(Queue::bounded(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop_blocking());
        thread::sleep(Duration::from_millis(50));
        q.push("hello").unwrap();
        assert_eq!(handle.join().unwrap(), "hello");
    }

    #[test]
    fn try_pop_reports_timeout_when_lock_is_held() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::bounded(4));
        let q2 = q.clone();
        let guard = q.lock();
        let handle = thread::spawn(move || q2.try_pop(Duration::from_millis(20)));
        let result = handle.join().unwrap();
        drop(guard);
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
