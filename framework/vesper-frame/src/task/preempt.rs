// SPDX-License-Identifier: MPL-2.0

use core::marker::PhantomData;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use crate::cpu_local;

cpu_local! {
    static PREEMPT_COUNT: PreemptInfo = PreemptInfo::new();
}

/// The number of preemption-disabling holds (spin locks, explicit guards)
/// on the current CPU. While non-zero, the CPU must not call `schedule()`.
struct PreemptInfo {
    num: AtomicUsize,
}

impl PreemptInfo {
    const fn new() -> Self {
        Self {
            num: AtomicUsize::new(0),
        }
    }

    fn increase(&self) {
        self.num.fetch_add(1, Relaxed);
    }

    fn decrease(&self) {
        self.num.fetch_sub(1, Relaxed);
    }

    fn num(&self) -> usize {
        self.num.load(Relaxed)
    }
}

/// A guard for disabled preemption.
#[must_use]
pub struct DisablePreemptGuard {
    // This private field prevents user from constructing values of this
    // type directly, and makes the guard `!Send`.
    _private: PhantomData<*mut ()>,
}

impl DisablePreemptGuard {
    fn new() -> Self {
        PREEMPT_COUNT.get().increase();
        Self {
            _private: PhantomData,
        }
    }

    /// Transfers this guard to a new guard.
    /// This guard must be dropped after this function.
    pub fn transfer_to(&self) -> Self {
        disable_preempt()
    }
}

impl Drop for DisablePreemptGuard {
    fn drop(&mut self) {
        PREEMPT_COUNT.get().decrease();
    }
}

/// Disables preemption on the current CPU.
#[must_use]
pub fn disable_preempt() -> DisablePreemptGuard {
    DisablePreemptGuard::new()
}

/// Whether the current CPU holds any preemption-disabling guard.
pub fn in_atomic() -> bool {
    PREEMPT_COUNT.get().num() != 0
}

/// Whether the current CPU may call `schedule()`.
pub fn is_preemptible() -> bool {
    !in_atomic()
}
