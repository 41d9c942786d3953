// SPDX-License-Identifier: MPL-2.0

//! The global process table.
//!
//! Mutations take the table spin lock; lookups may instead run inside an
//! RCU reader section, since a process removed from the table has its
//! storage released only after a grace period (see the exit path).

use super::{Pid, Process};
use crate::prelude::*;

static PROCESS_TABLE: SpinLock<BTreeMap<Pid, Arc<Process>>> = SpinLock::new(BTreeMap::new());

pub fn attach(process: Arc<Process>) {
    let old = PROCESS_TABLE.lock().insert(process.pid(), process);
    debug_assert!(old.is_none(), "PID reused while still attached");
}

pub fn detach(pid: Pid) -> Option<Arc<Process>> {
    PROCESS_TABLE.lock().remove(&pid)
}

pub fn get(pid: Pid) -> Option<Arc<Process>> {
    let _guard = vesper_frame::sync::rcu::read_lock();
    PROCESS_TABLE.lock().get(&pid).cloned()
}

/// Walks a snapshot of all processes.
pub fn for_each(mut f: impl FnMut(&Arc<Process>)) {
    let snapshot: Vec<Arc<Process>> = {
        let _guard = vesper_frame::sync::rcu::read_lock();
        PROCESS_TABLE.lock().values().cloned().collect()
    };
    for process in &snapshot {
        f(process);
    }
}

pub fn len() -> usize {
    PROCESS_TABLE.lock().len()
}
