//! FIFO command queue feeding a session worker thread.
//!
//! A `parking_lot` mutex and condvar around a `VecDeque`.  Besides plain
//! pushes it supports coalescing (`replace`), which is what keeps the queue
//! bounded: at most one pending start, one pending write and one pending
//! read at any time.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Result of waiting for the next command.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Popped<T> {
    Item(T),
    /// The deadline passed with nothing queued.
    TimedOut,
    /// The queue was closed and is empty.
    Closed,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub(crate) struct WorkQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> WorkQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Appends `item`.  Returns `false` if the queue is closed.
    pub(crate) fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Removes every pending item matching `same`, then appends `item`.
    /// Returns `false` if the queue is closed.
    pub(crate) fn replace(&self, item: T, same: impl Fn(&T) -> bool) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.items.retain(|pending| !same(pending));
        state.items.push_back(item);
        self.ready.notify_one();
        true
    }

    /// Drops every pending item.
    pub(crate) fn clear(&self) {
        self.state.lock().items.clear();
    }

    /// Closes the queue unless a pending item matches `keep_open`.
    /// Returns `true` if the queue is now closed.
    pub(crate) fn close_unless(&self, keep_open: impl Fn(&T) -> bool) -> bool {
        let mut state = self.state.lock();
        if state.items.iter().any(|item| keep_open(item)) {
            return false;
        }
        state.closed = true;
        state.items.clear();
        self.ready.notify_all();
        true
    }

    /// Reopens a closed queue.  Returns `true` if it was closed.
    pub(crate) fn reopen(&self) -> bool {
        let mut state = self.state.lock();
        let was_closed = state.closed;
        state.closed = false;
        was_closed
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Blocks until an item arrives, `deadline` passes, or the queue closes.
    pub(crate) fn pop_until(&self, deadline: Option<Instant>) -> Popped<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Popped::Item(item);
            }
            if state.closed {
                return Popped::Closed;
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && state.items.is_empty()
                    {
                        return if state.closed { Popped::Closed } else { Popped::TimedOut };
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_replace_keeps_only_latest_matching_item() {
        // Arrange
        let queue = WorkQueue::new();
        queue.push(1);
        queue.push(10);

        // Act
        queue.replace(20, |n| *n >= 10);

        // Assert
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_until(None), Popped::Item(1));
        assert_eq!(queue.pop_until(None), Popped::Item(20));
    }

    #[test]
    fn test_close_unless_stays_open_while_matching_item_pending() {
        let queue = WorkQueue::new();
        queue.push("start");

        assert!(!queue.close_unless(|item| *item == "start"));
        assert!(!queue.is_closed());

        queue.clear();
        assert!(queue.close_unless(|item| *item == "start"));
        assert!(!queue.push("late"), "closed queue rejects pushes");
        assert_eq!(queue.pop_until(None), Popped::Closed);
    }

    #[test]
    fn test_close_wakes_blocked_waiter() {
        // Arrange
        let queue: std::sync::Arc<WorkQueue<u8>> = std::sync::Arc::new(WorkQueue::new());
        let waiter = std::sync::Arc::clone(&queue);
        let handle = std::thread::spawn(move || waiter.pop_until(None));
        std::thread::sleep(Duration::from_millis(20));

        // Act
        let closed = queue.close_unless(|_| false);

        // Assert
        assert!(closed);
        assert_eq!(handle.join().unwrap(), Popped::Closed);
    }

    #[test]
    fn test_reopen_accepts_pushes_again() {
        let queue = WorkQueue::new();
        queue.close_unless(|_: &u8| false);
        assert!(queue.reopen());
        assert!(queue.push(1));
    }

    #[test]
    fn test_pop_until_times_out_when_empty() {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(queue.pop_until(Some(deadline)), Popped::TimedOut);
    }

    #[test]
    fn test_pop_wakes_on_push_from_other_thread() {
        let queue = std::sync::Arc::new(WorkQueue::new());
        let producer = std::sync::Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            producer.push(42);
        });

        assert_eq!(queue.pop_until(None), Popped::Item(42));
        handle.join().unwrap();
    }
}
