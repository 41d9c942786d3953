// SPDX-License-Identifier: MPL-2.0

#![allow(unused)]

pub(crate) use alloc::{
    boxed::Box,
    collections::{BTreeMap, BTreeSet, VecDeque},
    string::{String, ToString},
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::{any::Any, fmt::Debug};

pub(crate) use bitflags::bitflags;
pub(crate) use log::{debug, error, info, trace, warn};
pub(crate) use vesper_frame::{
    mm::{Paddr, Vaddr, PAGE_SIZE},
    sync::{Mutex, MutexGuard, RwMutex, SpinLock, SpinLockGuard},
};

pub(crate) use crate::{
    error::{Errno, Error},
    return_errno, return_errno_with_message,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;

/// Returns the current process.
#[macro_export]
macro_rules! current {
    () => {
        $crate::process::current()
    };
}

pub(crate) use crate::current;
