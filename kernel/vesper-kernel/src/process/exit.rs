// SPDX-License-Identifier: MPL-2.0

//! Process termination.

use vesper_frame::sync::rcu;

use super::{
    process_table,
    signal::{send_signal, Signal, SIGCHLD},
    Process, ProcessState,
};
use crate::{domain, prelude::*};

/// Tears `process` down: releases its address space and resources,
/// reparents its children to the namespace reaper, turns it into a
/// zombie, and notifies the parent. The task storage is kept until the
/// zombie is reaped; the reap defers the final release behind an RCU
/// grace period so lockless table walks stay safe.
pub fn exit_process(process: &Arc<Process>, exit_code: i32) {
    if process.is_zombie() {
        return;
    }
    process.set_state(ProcessState::Exiting);
    process.set_exit_code(exit_code);

    // Release the address space and the collaborator resources;
    // shared ones just drop a reference.
    drop(process.take_vmar());
    if let Some(files) = process.files.lock().take() {
        files.close_all();
        drop(files);
    }
    drop(process.fs.lock().take());

    reparent_children(process);

    process.set_state(ProcessState::Zombie);
    domain::detach(process);

    if let Some(parent) = process.parent() {
        send_signal(
            &parent,
            Signal {
                num: SIGCHLD,
                fault_addr: 0,
            },
        );
        parent.children_wait().wake_all();
    } else {
        // No parent will reap a namespace root; release it directly.
        release_process(process);
    }
}

/// The voluntary exit path of the current task.
pub fn do_exit(exit_code: i32) -> ! {
    let process = crate::process::current().expect("exit without a process");
    exit_process(&process, exit_code);
    vesper_frame::task::Task::current().exit()
}

/// Hands every child to the enclosing namespace's reaper, or to the
/// parent namespace's reaper when the dying process is the reaper
/// itself.
fn reparent_children(process: &Arc<Process>) {
    let mut children = core::mem::take(&mut *process.children().lock());
    if children.is_empty() {
        return;
    }

    let ns = process.pid_ns();
    let reaper = match ns.reaper() {
        Some(reaper) if reaper.pid() != process.pid() => Some(reaper),
        _ => ns.parent().and_then(|parent_ns| parent_ns.reaper()),
    };

    match reaper {
        Some(reaper) => {
            let mut adopted = reaper.children().lock();
            for (pid, child) in children {
                child.set_parent(&reaper);
                adopted.insert(pid, child);
            }
        }
        None => {
            // The last reaper of the hierarchy is dying; orphans are
            // released once they exit.
            for (_, child) in children.iter() {
                *child.parent.lock() = Weak::new();
                if child.is_zombie() {
                    release_process(child);
                }
            }
            children.clear();
        }
    }
}

/// Drops the process's table entry; the storage goes away after a grace
/// period, keeping concurrent lockless walkers safe.
pub(super) fn release_process(process: &Arc<Process>) {
    let pid = process.pid();
    let Some(entry) = process_table::detach(pid) else {
        return;
    };
    let pid_in_ns = process.pid_in_ns();
    let pid_ns = process.pid_ns().clone();
    rcu::call_rcu(move || {
        drop(entry);
        if pid_ns.level() > 0 {
            pid_ns.release_pid(pid_in_ns);
            super::clone::root_pid_ns().release_pid(pid);
        } else {
            pid_ns.release_pid(pid);
        }
    });
}
