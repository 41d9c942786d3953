// SPDX-License-Identifier: MPL-2.0

//! Reaping dead children.

use super::{exit::release_process, Pid, Process};
use crate::prelude::*;

/// Which children a wait covers.
#[derive(Clone, Copy, Debug)]
pub enum WaitFilter {
    AnyChild,
    Child(Pid),
}

impl WaitFilter {
    fn matches(&self, pid: Pid) -> bool {
        match self {
            WaitFilter::AnyChild => true,
            WaitFilter::Child(target) => *target == pid,
        }
    }
}

/// Picks up one zombie child without blocking. Returns the reaped PID
/// and its exit code.
pub fn reap_zombie(parent: &Arc<Process>, filter: WaitFilter) -> Result<Option<(Pid, i32)>> {
    let mut children = parent.children().lock();
    if children.is_empty() {
        return_errno_with_message!(Errno::ECHILD, "nothing to wait for");
    }
    if let WaitFilter::Child(pid) = filter {
        if !children.contains_key(&pid) {
            return_errno_with_message!(Errno::ECHILD, "no such child");
        }
    }

    let zombie_pid = children
        .iter()
        .find(|(pid, child)| filter.matches(**pid) && child.is_zombie())
        .map(|(pid, _)| *pid);
    let Some(pid) = zombie_pid else {
        return Ok(None);
    };
    let child = children.remove(&pid).unwrap();
    drop(children);

    let code = child.exit_code();
    release_process(&child);
    Ok(Some((pid, code)))
}

/// `wait4`: blocks until a matching child dies, then reaps it.
pub fn wait_child(parent: &Arc<Process>, filter: WaitFilter) -> Result<(Pid, i32)> {
    parent
        .children_wait()
        .wait_until(|| match reap_zombie(parent, filter) {
            Ok(Some(reaped)) => Some(Ok(reaped)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        })
}
