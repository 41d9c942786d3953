// SPDX-License-Identifier: MPL-2.0

//! PID namespaces.

use id_alloc::IdAlloc;

use super::Process;
use crate::prelude::*;

pub type Pid = u32;

const MAX_PIDS: usize = 1 << 15;

/// A PID namespace: an id space plus the reaper that adopts orphans
/// inside it.
pub struct PidNamespace {
    parent: Option<Arc<PidNamespace>>,
    level: u32,
    ids: SpinLock<IdAlloc>,
    reaper: SpinLock<Weak<Process>>,
}

impl PidNamespace {
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            level: 0,
            ids: SpinLock::new(Self::fresh_ids()),
            reaper: SpinLock::new(Weak::new()),
        })
    }

    /// Creates a namespace nested in `parent`, with its own id space.
    pub fn new_child(parent: &Arc<PidNamespace>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(parent.clone()),
            level: parent.level + 1,
            ids: SpinLock::new(Self::fresh_ids()),
            reaper: SpinLock::new(Weak::new()),
        })
    }

    fn fresh_ids() -> IdAlloc {
        let mut ids = IdAlloc::with_capacity(MAX_PIDS);
        // PID 0 stands for the idle/swapper lineage and is never handed
        // out.
        ids.alloc_specific(0);
        ids
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn parent(&self) -> Option<&Arc<PidNamespace>> {
        self.parent.as_ref()
    }

    pub fn alloc_pid(&self) -> Result<Pid> {
        self.ids
            .lock()
            .alloc()
            .map(|pid| pid as Pid)
            .ok_or(Error::with_message(Errno::EAGAIN, "PID space exhausted"))
    }

    pub fn release_pid(&self, pid: Pid) {
        self.ids.lock().free(pid as usize);
    }

    /// The process that adopts orphans of this namespace.
    pub fn reaper(&self) -> Option<Arc<Process>> {
        self.reaper.lock().upgrade()
    }

    /// Installs the namespace's init; its first process.
    pub fn set_reaper(&self, process: &Arc<Process>) {
        *self.reaper.lock() = Arc::downgrade(process);
    }
}
