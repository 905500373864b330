//! Bounded FIFO with join tracking
//!
//! Producers block in [`WorkQueue::push`] while the queue is at capacity.
//! Every pushed item bumps an unfinished counter that only
//! [`WorkQueue::task_done`] brings back down, so [`WorkQueue::join`] returns
//! once every item has been both taken *and* finished, including items
//! pushed by consumers while the queue was draining.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    /// Pushed but not yet marked done (queued + in flight)
    unfinished: usize,
}

pub(crate) struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
    drained: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "work queue capacity must be positive");
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                unfinished: 0,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            drained: Condvar::new(),
        }
    }

    /// Append an item, blocking while the queue is full
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        state.items.push_back(item);
        state.unfinished += 1;
        self.not_empty.notify_one();
    }

    /// Take the oldest item, blocking while the queue is empty
    pub fn pop(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return item;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Mark one previously popped item as finished
    pub fn task_done(&self) {
        let mut state = self.state.lock();
        // More completions than pushes means the pool's bookkeeping is broken.
        assert!(state.unfinished > 0, "task_done called more times than items were queued");
        state.unfinished -= 1;
        if state.unfinished == 0 {
            self.drained.notify_all();
        }
    }

    /// Block until every pushed item has been marked done
    pub fn join(&self) {
        let mut state = self.state.lock();
        while state.unfinished > 0 {
            self.drained.wait(&mut state);
        }
    }

    /// Items waiting to be taken
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn unfinished(&self) -> usize {
        self.state.lock().unfinished
    }
}
