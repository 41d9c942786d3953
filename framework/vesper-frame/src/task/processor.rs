// SPDX-License-Identifier: MPL-2.0

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use super::{
    preempt::is_preemptible,
    scheduler,
    task::{Task, TaskStatus},
};
use crate::{arch::context::{context_switch, TaskContext}, cpu_local, cpu::this_cpu};

pub struct Processor {
    current: Option<Arc<Task>>,
    /// Keeps the task we just switched away from alive until the next
    /// switch, since we cannot drop it while running on its stack.
    prev_task: Option<Arc<Task>>,
    /// The context of the CPU's boot/idle flow of control.
    boot_ctx: TaskContext,
}

impl Processor {
    pub const fn new() -> Self {
        Self {
            current: None,
            prev_task: None,
            boot_ctx: TaskContext::new(),
        }
    }

    fn boot_ctx_ptr(&mut self) -> *mut TaskContext {
        &mut self.boot_ctx as *mut _
    }

    pub fn current(&self) -> Option<Arc<Task>> {
        self.current.as_ref().map(Arc::clone)
    }
}

cpu_local! {
    static PROCESSOR: RefCell<Processor> = RefCell::new(Processor::new());
    static NEED_RESCHED: AtomicBool = AtomicBool::new(false);
}

/// Retrieves the current task running on the processor.
pub fn current_task() -> Option<Arc<Task>> {
    let guard = crate::trap::disable_local();
    let processor = PROCESSOR.get_with(&guard);
    let current = processor.borrow().current();
    current
}

/// Raises the local need-resched flag; the next preemption point will
/// reschedule.
pub fn set_need_resched() {
    let guard = crate::trap::disable_local();
    NEED_RESCHED.get_with(&guard).store(true, Ordering::Release);
}

pub fn need_resched() -> bool {
    let guard = crate::trap::disable_local();
    NEED_RESCHED.get_with(&guard).load(Ordering::Acquire)
}

/// Voluntarily gives up the CPU, leaving the current task runnable.
pub fn yield_now() {
    schedule_current();
}

/// The preemption point on interrupt/syscall return paths: reschedules if
/// the flag is raised and the CPU is preemptible.
pub fn preempt_if_needed() {
    if !need_resched() || !is_preemptible() {
        return;
    }
    schedule_current();
}

/// The per-tick scheduling hook. Runs the installed scheduler's
/// bookkeeping for the current task and raises need-resched on quantum
/// expiry.
pub(crate) fn scheduler_tick() {
    let Some(sched) = scheduler::installed() else {
        return;
    };
    let Some(current) = current_task() else {
        return;
    };
    let cpu = this_cpu();
    if sched.tick(cpu, &current) || sched.should_preempt(cpu, &current) {
        set_need_resched();
    }
}

/// Switches to the next task the scheduler picks for this CPU.
///
/// The current task, if still runnable, is handed back to the scheduler
/// first. If nothing is runnable, control returns to the CPU's boot/idle
/// context.
pub fn schedule_current() {
    if !is_preemptible() {
        panic!("schedule() while atomic");
    }

    let guard = crate::trap::disable_local();
    NEED_RESCHED.get_with(&guard).store(false, Ordering::Release);

    let Some(sched) = scheduler::installed() else {
        // Nothing to switch to before a scheduler exists; boot-time
        // callers just keep running.
        return;
    };

    let cpu = this_cpu();

    let current = PROCESSOR.get_with(&guard).borrow().current();
    let current_ctx_ptr = match &current {
        None => PROCESSOR.get_with(&guard).borrow_mut().boot_ctx_ptr(),
        Some(current) => {
            let ctx_ptr = current.ctx_ptr();
            let mut status = current.status();
            debug_assert_ne!(*status, TaskStatus::Sleeping);
            match *status {
                TaskStatus::Runnable => {
                    drop(status);
                    sched.enqueue(current.clone());
                }
                TaskStatus::Sleepy => {
                    *status = TaskStatus::Sleeping;
                }
                _ => (),
            }
            ctx_ptr
        }
    };

    let Some(next) = sched.pick_next(cpu) else {
        // The queue is empty; the idle class of the kernel scheduler
        // normally prevents this. Keep running what we have, undoing a
        // pending sleep transition so wakers keep working.
        if let Some(current) = &current {
            let mut status = current.status();
            if *status == TaskStatus::Sleeping {
                *status = TaskStatus::Runnable;
            }
        }
        return;
    };

    if let Some(current) = &current {
        if Arc::ptr_eq(current, &next) {
            return;
        }
        current.save_fpu();
    }

    next.sched_attr().last_cpu.store(cpu, Ordering::Relaxed);
    if let Some(user_space) = next.user_space() {
        user_space.vm_space().activate();
    }
    next.restore_fpu();

    let next_ctx_ptr = next.ctx_ptr().cast_const();
    {
        let mut processor = PROCESSOR.get_with(&guard).borrow_mut();
        let old_current = processor.current.replace(next);
        processor.prev_task = old_current;
    }

    // Keep IRQs off across the switch; the new task re-enables them on
    // its own return path.
    core::mem::forget(guard);

    // SAFETY: Both contexts are valid: ours is saved into, the next one
    // was saved by a previous switch (or freshly initialized) and its
    // kernel stack is alive.
    unsafe {
        context_switch(current_ctx_ptr, next_ctx_ptr);
    }

    crate::arch::irq::enable_local();
}
