// SPDX-License-Identifier: MPL-2.0

use alloc::sync::Arc;

use spin::Once;

use super::task::Task;
use crate::{arch, cpu::this_cpu};

/// The scheduler interface the kernel plugs its class-based implementation
/// into.
///
/// The frame owns the per-CPU notion of "the current task" (see the
/// processor module); the scheduler owns every runnable task that is not
/// current. A still-runnable task is handed back through [`enqueue`] right
/// before the dispatcher switches away from it.
///
/// [`enqueue`]: Scheduler::enqueue
pub trait Scheduler: Sync + Send {
    /// Enqueues a runnable task, choosing a CPU for it.
    ///
    /// Returns the CPU that should reschedule promptly because the new
    /// task outranks its current one, if any.
    fn enqueue(&self, task: Arc<Task>) -> Option<u32>;

    /// Picks the next task to run on `cpu` and accounts it as that CPU's
    /// running task.
    fn pick_next(&self, cpu: u32) -> Option<Arc<Task>>;

    /// Whether `current` on `cpu` should yield to a queued task.
    fn should_preempt(&self, cpu: u32, current: &Arc<Task>) -> bool;

    /// Per-tick bookkeeping for `cpu` whose running task is `current`.
    /// Returns whether the current task's quantum expired.
    fn tick(&self, cpu: u32, current: &Arc<Task>) -> bool;
}

static SCHEDULER: Once<&'static dyn Scheduler> = Once::new();

/// Installs the global task scheduler.
///
/// This must be called once, before any call to [`Task::run`].
pub fn set_scheduler(scheduler: &'static dyn Scheduler) {
    SCHEDULER.call_once(|| scheduler);
}

pub(crate) fn installed() -> Option<&'static dyn Scheduler> {
    SCHEDULER.get().copied()
}

/// Hands a runnable task to the scheduler and kicks the chosen CPU if the
/// task should preempt it.
pub fn add_task(task: Arc<Task>) {
    let scheduler = *SCHEDULER
        .get()
        .expect("no scheduler is installed");
    if let Some(cpu) = scheduler.enqueue(task) {
        if cpu == this_cpu() {
            super::processor::set_need_resched();
        } else {
            arch::irq::send_ipi(cpu, arch::IpiVector::Reschedule);
        }
    }
}
