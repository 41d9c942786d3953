// SPDX-License-Identifier: MPL-2.0

//! Thin handles to resources owned by external collaborators.
//!
//! The filesystem layer populates these; the core only needs their
//! share-versus-copy semantics across `clone` and their release on exit.

use crate::prelude::*;

/// The open-file table of a process. Slots are opaque to the core.
pub struct FileTable {
    slots: SpinLock<BTreeMap<u32, Arc<dyn Any + Send + Sync>>>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            slots: SpinLock::new(BTreeMap::new()),
        }
    }

    /// The deep copy used by a plain `fork`.
    pub fn deep_clone(&self) -> Self {
        Self {
            slots: SpinLock::new(self.slots.lock().clone()),
        }
    }

    /// Drops every open file; the exit path calls this before the
    /// process record lingers as a zombie.
    pub fn close_all(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// The filesystem context (root and working directory), opaque here.
pub struct FsContext {
    cwd: SpinLock<String>,
}

impl Default for FsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FsContext {
    pub fn new() -> Self {
        Self {
            cwd: SpinLock::new(String::from("/")),
        }
    }

    pub fn deep_clone(&self) -> Self {
        Self {
            cwd: SpinLock::new(self.cwd.lock().clone()),
        }
    }

    pub fn cwd(&self) -> String {
        self.cwd.lock().clone()
    }

    pub fn set_cwd(&self, cwd: String) {
        *self.cwd.lock() = cwd;
    }
}
