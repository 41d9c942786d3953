// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use super::WaitQueue;

/// A sleeping reader-writer semaphore.
///
/// Many readers or at most one writer hold the semaphore at any point in
/// time; contended acquirers sleep on the internal wait queue. This is the
/// structural lock of address spaces: page-fault handling and lookups take
/// it for reading, mapping changes take it for writing.
///
/// Must not be taken in interrupt context, as it may sleep.
pub struct RwMutex<T: ?Sized> {
    /// Bit 63 is the writer bit; the low bits count readers.
    lock: AtomicUsize,
    /// Threads that fail to acquire the semaphore sleep on this queue.
    queue: WaitQueue,
    val: UnsafeCell<T>,
}

const READER: usize = 1;
const WRITER: usize = 1 << (usize::BITS - 1);
const MAX_READER: usize = 1 << (usize::BITS - 2);

impl<T> RwMutex<T> {
    /// Creates a new reader-writer semaphore with an initial value.
    pub const fn new(val: T) -> Self {
        Self {
            lock: AtomicUsize::new(0),
            queue: WaitQueue::new(),
            val: UnsafeCell::new(val),
        }
    }
}

impl<T: ?Sized> RwMutex<T> {
    /// Acquires a read lock, sleeping until no writer is present.
    pub fn read(&self) -> RwMutexReadGuard<T> {
        self.queue.wait_until(|| self.try_read())
    }

    /// Acquires the write lock, sleeping until no reader or writer is
    /// present.
    pub fn write(&self) -> RwMutexWriteGuard<T> {
        self.queue.wait_until(|| self.try_write())
    }

    /// Tries acquiring a read lock immediately.
    pub fn try_read(&self) -> Option<RwMutexReadGuard<T>> {
        let lock = self.lock.fetch_add(READER, Acquire);
        if lock & (WRITER | MAX_READER) == 0 {
            Some(RwMutexReadGuard { inner: self })
        } else {
            self.lock.fetch_sub(READER, Release);
            None
        }
    }

    /// Tries acquiring the write lock immediately.
    pub fn try_write(&self) -> Option<RwMutexWriteGuard<T>> {
        if self
            .lock
            .compare_exchange(0, WRITER, Acquire, Relaxed)
            .is_ok()
        {
            Some(RwMutexWriteGuard { inner: self })
        } else {
            None
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.val, f)
    }
}

// SAFETY: Readers share `&T` across tasks and the writer moves `&mut T`
// between tasks, so both `Send` and `Sync` on `T` are required.
unsafe impl<T: ?Sized + Send> Send for RwMutex<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwMutex<T> {}

#[must_use]
pub struct RwMutexReadGuard<'a, T: ?Sized> {
    inner: &'a RwMutex<T>,
}

impl<T: ?Sized> Deref for RwMutexReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The read guard witnesses the absence of writers.
        unsafe { &*self.inner.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexReadGuard<'_, T> {
    fn drop(&mut self) {
        if self.inner.lock.fetch_sub(READER, Release) == READER {
            // This was the last reader; let a waiting writer in.
            self.inner.queue.wake_all();
        }
    }
}

#[must_use]
pub struct RwMutexWriteGuard<'a, T: ?Sized> {
    inner: &'a RwMutex<T>,
}

impl<T: ?Sized> Deref for RwMutexWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: The write guard witnesses exclusive access.
        unsafe { &*self.inner.val.get() }
    }
}

impl<T: ?Sized> DerefMut for RwMutexWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The write guard witnesses exclusive access.
        unsafe { &mut *self.inner.val.get() }
    }
}

impl<T: ?Sized> Drop for RwMutexWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.lock.fetch_and(!WRITER, Release);
        self.inner.queue.wake_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn readers_exclude_writer() {
        let m = RwMutex::new(5);
        let r1 = m.try_read().unwrap();
        let r2 = m.try_read().unwrap();
        assert_eq!(*r1, 5);
        assert_eq!(*r2, 5);
        assert!(m.try_write().is_none());
        drop(r1);
        drop(r2);
        let mut w = m.try_write().unwrap();
        *w += 1;
        assert_eq!(*w, 6);
        assert!(m.try_read().is_none());
    }
}
