//! Dispatch lock as a single-slot ticket queue.

use std::collections::VecDeque;

/// Serializes the close → pace → dispatch transition.
///
/// Closed batches wait in FIFO order; at most one holds the gate. The gate is
/// plain data guarded by the batcher's state mutex, so acquiring and releasing
/// never suspends.
#[derive(Debug)]
pub(crate) struct DispatchGate<T> {
    held: bool,
    waiting: VecDeque<T>,
}

impl<T> DispatchGate<T> {
    pub(crate) fn new() -> Self {
        Self {
            held: false,
            waiting: VecDeque::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, ticket: T) {
        self.waiting.push_back(ticket);
    }

    /// Take the gate for the oldest waiter, if the gate is free.
    pub(crate) fn try_acquire(&mut self) -> Option<T> {
        if self.held {
            return None;
        }
        let next = self.waiting.pop_front()?;
        self.held = true;
        Some(next)
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(self.held, "dispatch gate released while free");
        self.held = false;
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held
    }

    pub(crate) fn waiting(&self) -> usize {
        self.waiting.len()
    }
}
