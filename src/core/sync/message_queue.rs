use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    // Bumped by every flush so blocked receivers give up their wait.
    flush_epoch: u64,
    // Set by flush and taken by the next receiver that finds the queue empty,
    // so a receiver arriving after the flush does not block.
    flush_pending: bool,
}

impl<T> QueueState<T> {
    fn take_flush(&mut self) -> bool {
        std::mem::take(&mut self.flush_pending)
    }
}

/// Unbounded FIFO used for control events between stages.
///
/// `put` never blocks and never fails. `get` blocks until an item arrives or
/// the queue is flushed or closed.
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                flush_epoch: 0,
                flush_pending: false,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, item: T) {
        let mut state = self.lock();
        state.items.push_back(item);
        state.flush_pending = false;
        self.cond.notify_one();
    }

    /// Takes the oldest item, waiting if the queue is empty.
    ///
    /// Returns `None` when woken by a flush, or once a closed queue is drained.
    pub fn get(&self) -> Option<T> {
        let mut state = self.lock();
        if let Some(item) = state.items.pop_front() {
            return Some(item);
        }
        if state.closed || state.take_flush() {
            return None;
        }
        let epoch = state.flush_epoch;
        let mut state = self
            .cond
            .wait_while(state, |s| {
                s.items.is_empty() && !s.closed && s.flush_epoch == epoch
            })
            .unwrap_or_else(PoisonError::into_inner);
        let item = state.items.pop_front();
        if item.is_none() {
            state.take_flush();
        }
        item
    }

    /// Same as [`get`](Self::get) but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        let epoch = state.flush_epoch;
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed || state.flush_epoch != epoch || state.take_flush() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Discards every queued item and wakes blocked receivers. If none is
    /// blocked, the next `get` on the empty queue returns `None` instead of
    /// waiting.
    pub fn flush(&self) -> usize {
        let mut state = self.lock();
        let discarded = state.items.len();
        state.items.clear();
        state.flush_epoch = state.flush_epoch.wrapping_add(1);
        state.flush_pending = true;
        self.cond.notify_all();
        discarded
    }

    /// Stops blocking receivers once the remaining items are drained.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
