// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::task::{disable_preempt, DisablePreemptGuard};
use crate::trap::{disable_local, DisabledLocalIrqGuard};

/// A spin lock.
pub struct SpinLock<T: ?Sized> {
    lock: AtomicBool,
    val: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquires the spin lock with local IRQs disabled.
    ///
    /// Mandatory on any path where the lock may also be taken from
    /// interrupt context. The former IRQ state is restored when the guard
    /// is dropped.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<T> {
        let guard = disable_local();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            inner_guard: InnerGuard::IrqGuard(guard),
            _marker: PhantomData,
        }
    }

    /// Tries acquiring the spin lock immediately with local IRQs disabled.
    pub fn try_lock_irq_disabled(&self) -> Option<SpinLockGuard<T>> {
        let guard = disable_local();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                inner_guard: InnerGuard::IrqGuard(guard),
                _marker: PhantomData,
            });
        }
        None
    }

    /// Acquires the spin lock without disabling local IRQs.
    ///
    /// Cheaper than `lock_irq_disabled` and sufficient whenever the lock
    /// is never taken in interrupt context. Preemption stays disabled for
    /// the lifetime of the guard.
    pub fn lock(&self) -> SpinLockGuard<T> {
        let guard = disable_preempt();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            inner_guard: InnerGuard::PreemptGuard(guard),
            _marker: PhantomData,
        }
    }

    /// Tries acquiring the spin lock immediately without disabling IRQs.
    pub fn try_lock(&self) -> Option<SpinLockGuard<T>> {
        let guard = disable_preempt();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                inner_guard: InnerGuard::PreemptGuard(guard),
                _marker: PhantomData,
            });
        }
        None
    }

    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.val, f)
    }
}

// SAFETY: Only a single lock holder is permitted to access the inner data.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

enum InnerGuard {
    IrqGuard(DisabledLocalIrqGuard),
    PreemptGuard(DisablePreemptGuard),
}

/// The guard of a spin lock.
#[must_use]
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    #[allow(dead_code)]
    inner_guard: InnerGuard,
    // Guards protect per-CPU state and must not leave their CPU.
    _marker: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The guard witnesses exclusive access.
        unsafe { &*self.lock.val.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The guard witnesses exclusive access.
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// SAFETY: The guard can be shared between tasks/threads on the same CPU.
unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}
