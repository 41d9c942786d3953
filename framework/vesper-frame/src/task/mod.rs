// SPDX-License-Identifier: MPL-2.0

//! Tasks are the unit of code execution.

mod kstack;
mod nice;
mod preempt;
mod priority;
mod processor;
mod scheduler;
#[allow(clippy::module_inception)]
mod task;

pub use self::{
    kstack::{refill_worker_loop, KernelStack},
    nice::{nice_to_priority, priority_to_nice, Nice},
    preempt::{disable_preempt, in_atomic, is_preemptible, DisablePreemptGuard},
    priority::{Priority, MAX_RT_PRIO},
    processor::{
        current_task, need_resched, preempt_if_needed, schedule_current, set_need_resched,
        yield_now,
    },
    scheduler::{add_task, set_scheduler, Scheduler},
    task::{SchedAttr, SchedPolicy, Task, TaskAdapter, TaskOptions, TaskStatus},
};
pub(crate) use self::processor::scheduler_tick;

pub(crate) fn init() {
    kstack::init();
}
