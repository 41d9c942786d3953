// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives.

mod completion;
mod mutex;
pub mod rcu;
mod rwmutex;
mod spin;
mod wait;

pub use self::{
    completion::Completion,
    mutex::{Mutex, MutexGuard},
    rwmutex::{RwMutex, RwMutexReadGuard, RwMutexWriteGuard},
    spin::{SpinLock, SpinLockGuard},
    wait::{WaitQueue, Waiter, Waker},
};
