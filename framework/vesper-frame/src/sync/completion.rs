// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};

use super::WaitQueue;

/// A one-shot rendezvous: waiters block until `complete` has been called
/// at least once. Completion is sticky, so a waiter arriving late returns
/// immediately.
pub struct Completion {
    done: AtomicBool,
    queue: WaitQueue,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            queue: WaitQueue::new(),
        }
    }

    /// Marks the completion done and wakes all waiters.
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
        self.queue.wake_all();
    }

    /// Whether `complete` has been called.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Blocks until the completion is done.
    pub fn wait(&self) {
        self.queue
            .wait_until(|| self.done.load(Ordering::Acquire).then_some(()));
    }

    /// Blocks until the completion is done or the deadline (nanoseconds of
    /// uptime) passes. Returns whether the completion is done.
    pub fn wait_deadline(&self, deadline_ns: u64) -> bool {
        self.queue
            .wait_until_or_deadline(|| self.done.load(Ordering::Acquire).then_some(()), deadline_ns)
            .is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completion_is_sticky() {
        let c = Completion::new();
        assert!(!c.is_done());
        c.complete();
        assert!(c.is_done());
        // A late waiter does not block.
        c.wait();
    }
}
