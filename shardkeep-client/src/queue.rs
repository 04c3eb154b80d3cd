//! Bounded job queue shared between pipeline callers and the worker thread

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Thread-safe FIFO with a capacity hint, blocking pop and cancellation.
///
/// `push` never blocks; the capacity only sizes the initial allocation.
/// The worker uses `pop_wait`, which sleeps until an item arrives and exits
/// once the stop flag is observed while the queue is empty, so queued work is
/// drained before shutdown unless `clear` removed it first.
pub struct JobQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> JobQueue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
        }
    }

    /// Append an item and wake one waiter
    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
        self.available.notify_one();
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Pop, sleeping while the queue is empty. Returns `None` only when the
    /// queue is empty and `stop` is set.
    pub fn pop_wait(&self, stop: &AtomicBool) -> Option<T> {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            self.available.wait(&mut items);
        }
    }

    /// Drop all pending items (cancel-on-shutdown)
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    /// Wake every waiter so a newly set stop flag is observed
    pub fn notify_all(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
