// SPDX-License-Identifier: MPL-2.0

use alloc::{collections::VecDeque, sync::Arc};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::SpinLock;
use crate::task::{current_task, schedule_current, yield_now, Task};

/// A wait queue.
///
/// One may wait on a wait queue to put its executing thread to sleep.
/// Multiple threads may be the waiters of a wait queue.
/// Other threads may invoke the `wake`-family methods of a wait queue to
/// wake up one or many waiter threads.
pub struct WaitQueue {
    // A copy of `wakers.len()`, used for the lock-free fast path in
    // `wake_one` and `wake_all`.
    num_wakers: AtomicU32,
    wakers: SpinLock<VecDeque<Arc<Waker>>>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            num_wakers: AtomicU32::new(0),
            wakers: SpinLock::new(VecDeque::new()),
        }
    }

    /// Waits until some condition becomes true.
    ///
    /// This method takes a closure that tests a user-given condition.
    /// The method only returns if the condition returns `Some(_)`.
    /// A waker thread should first make the condition `Some(_)`, then
    /// invoke the `wake`-family method. This ordering is important to
    /// ensure that waiter threads do not lose any wakeup notifications.
    pub fn wait_until<F, R>(&self, cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        self.wait_until_or_cancelled(cond, || false).unwrap()
    }

    /// Waits until some condition becomes true or the cancel condition
    /// becomes true.
    ///
    /// This method will return `Some(_)` if the condition returns
    /// `Some(_)`, and will return the condition test result regardless
    /// what it is when the cancel condition becomes true.
    pub fn wait_until_or_cancelled<F, R, FCancel>(
        &self,
        mut cond: F,
        cancel_cond: FCancel,
    ) -> Option<R>
    where
        F: FnMut() -> Option<R>,
        FCancel: Fn() -> bool,
    {
        if let Some(res) = cond() {
            return Some(res);
        }

        let waiter = Waiter::new();
        let waker = waiter.waker();

        loop {
            // Enqueue the waker before checking `cond()` to avoid races.
            self.enqueue(waker.clone());

            if let Some(res) = cond() {
                return Some(res);
            }

            if cancel_cond() {
                // Drop the waiter and check again to avoid missing a wake
                // event.
                drop(waiter);
                return cond();
            }

            waiter.wait();
        }
    }

    /// Waits until the condition becomes true or the deadline (in
    /// nanoseconds of uptime) passes, in which case `None` is returned.
    pub fn wait_until_or_deadline<F, R>(&self, mut cond: F, deadline_ns: u64) -> Option<R>
    where
        F: FnMut() -> Option<R>,
    {
        self.wait_until_or_cancelled(&mut cond, || crate::timer::uptime_ns() >= deadline_ns)
    }

    /// Wakes up one waiting thread.
    pub fn wake_one(&self) {
        // Fast path
        if self.is_empty() {
            return;
        }

        loop {
            let mut wakers = self.wakers.lock_irq_disabled();
            let Some(waker) = wakers.pop_front() else {
                break;
            };
            self.num_wakers.fetch_sub(1, Ordering::Release);
            // Avoid holding the lock when calling `wake_up`.
            drop(wakers);

            if waker.wake_up() {
                return;
            }
        }
    }

    /// Wakes up all waiting threads.
    pub fn wake_all(&self) {
        // Fast path
        if self.is_empty() {
            return;
        }

        loop {
            let mut wakers = self.wakers.lock_irq_disabled();
            let Some(waker) = wakers.pop_front() else {
                break;
            };
            self.num_wakers.fetch_sub(1, Ordering::Release);
            // Avoid holding the lock when calling `wake_up`.
            drop(wakers);

            waker.wake_up();
        }
    }

    /// Wakes up at most `nr` waiting threads.
    pub fn wake_nr(&self, nr: usize) {
        for _ in 0..nr {
            if self.is_empty() {
                return;
            }
            self.wake_one();
        }
    }

    /// Returns whether the wait queue currently has no waiters.
    pub fn is_empty(&self) -> bool {
        self.num_wakers.load(Ordering::Acquire) == 0
    }

    fn enqueue(&self, waker: Arc<Waker>) {
        let mut wakers = self.wakers.lock_irq_disabled();
        wakers.push_back(waker);
        self.num_wakers.fetch_add(1, Ordering::Release);
    }
}

/// A waiter that can put the current thread to sleep until it is woken up
/// by the associated [`Waker`].
///
/// By definition, a waiter belongs to the current thread, so it cannot be
/// sent to another thread and its reference cannot be shared between
/// threads.
pub struct Waiter {
    waker: Arc<Waker>,
    _marker: core::marker::PhantomData<*mut ()>,
}

/// A waker that can wake up the associated [`Waiter`].
pub struct Waker {
    has_woken: AtomicBool,
    /// Absent before the scheduler runs the first task; a task-less waiter
    /// spins instead of sleeping.
    task: Option<Arc<Task>>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    /// Creates a waiter for the current thread of control.
    pub fn new() -> Self {
        let waker = Arc::new(Waker {
            has_woken: AtomicBool::new(false),
            task: current_task(),
        });
        Self {
            waker,
            _marker: core::marker::PhantomData,
        }
    }

    /// Waits until the waiter is woken by [`Waker::wake_up`].
    ///
    /// Returns immediately if the waiter has been woken since the end of
    /// the last call to this method (or since the waiter was created).
    pub fn wait(&self) {
        self.waker.do_wait();
    }

    /// Gets the associated [`Waker`].
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // Close the waker so that a late wake-up becomes a no-op.
        self.waker.close();
    }
}

impl Waker {
    /// Wakes up the associated [`Waiter`].
    ///
    /// Returns `true` if the waiter is woken by this call; `false` if it
    /// was already woken or has been dropped.
    pub fn wake_up(&self) -> bool {
        if self.has_woken.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(task) = &self.task {
            task.wake();
        }
        true
    }

    fn do_wait(&self) {
        while !self.has_woken.load(Ordering::Acquire) {
            match &self.task {
                Some(task) => {
                    task.set_sleepy();
                    // Re-check after publishing the sleepy state to avoid
                    // losing a concurrent wake-up.
                    if self.has_woken.load(Ordering::Acquire) {
                        task.set_runnable();
                        break;
                    }
                    schedule_current();
                }
                None => {
                    // Boot-time waits have nothing to sleep on.
                    yield_now();
                    core::hint::spin_loop();
                }
            }
        }

        self.has_woken.store(false, Ordering::Release);
    }

    fn close(&self) {
        self.has_woken.store(true, Ordering::Release);
    }
}
