// SPDX-License-Identifier: MPL-2.0

//! Read-copy update (RCU).
//!
//! Readers mark their critical sections with [`read_lock`], which only
//! disables preemption. Updaters publish a new version of the protected
//! data and then either block in [`synchronize_rcu`] until every reader
//! that could observe the old version has finished, or defer the cleanup
//! with [`call_rcu`].
//!
//! A quiescent state is any point at which a CPU is preemptible and hence
//! outside every reader section; CPUs report it from the timer tick. The
//! grace-period machinery is a tree of nodes so that thousands of CPUs do
//! not contend on one mask; see [`tree`].

pub mod tree;

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::Once;

use crate::{
    config::RCU_FANOUT,
    cpu::{num_cpus, this_cpu},
    sync::Completion,
    task::{disable_preempt, in_atomic, DisablePreemptGuard},
};

static RCU: Once<tree::RcuTree> = Once::new();

pub(crate) fn init() {
    RCU.call_once(|| tree::RcuTree::new(num_cpus() as usize, RCU_FANOUT));
}

fn rcu() -> &'static tree::RcuTree {
    RCU.get().expect("RCU is not initialized")
}

/// Marks a reader section. Readers observe either the pre- or the
/// post-update state of a publication, never a torn intermediate.
#[must_use]
pub struct RcuReadGuard {
    _preempt: DisablePreemptGuard,
}

/// Enters a reader section.
pub fn read_lock() -> RcuReadGuard {
    RcuReadGuard {
        _preempt: disable_preempt(),
    }
}

/// Defers `f` until after a full grace period has elapsed, without
/// blocking. Callbacks queued by one CPU run in FIFO order.
pub fn call_rcu<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    rcu().call_rcu(this_cpu() as usize, Box::new(f));
}

/// Blocks until every reader section that began before the call has
/// ended.
pub fn synchronize_rcu() {
    debug_assert!(!in_atomic());
    let completion = Arc::new(Completion::new());
    let done = completion.clone();
    call_rcu(move || done.complete());
    completion.wait();
}

/// The expedited variant currently aliases the normal path.
pub fn synchronize_rcu_expedited() {
    synchronize_rcu();
}

/// The timer-tick hook: reports a quiescent state when the interrupted
/// context was preemptible, and advances this CPU's callbacks.
pub(crate) fn note_tick() {
    let Some(rcu) = RCU.get() else {
        return;
    };
    let cpu = this_cpu() as usize;
    // The tick itself runs in interrupt context; the interrupted task is
    // in a reader section iff it holds a preemption-disabling guard.
    if !in_atomic() {
        rcu.note_quiescent(cpu);
    }
    rcu.process_callbacks(cpu);
}
