// SPDX-License-Identifier: MPL-2.0

use core::any::Any;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering::Relaxed};

use intrusive_collections::{intrusive_adapter, LinkedListAtomicLink};

use super::{
    add_task, kstack,
    priority::Priority,
    processor::{current_task, schedule_current},
};
use crate::{
    arch::context::TaskContext,
    arch::fpu::FpuState,
    cpu::CpuSet,
    prelude::*,
    sync::{SpinLock, SpinLockGuard},
    user::UserSpace,
};

/// The scheduling policy of a task.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SchedPolicy {
    /// Real-time, run-to-completion at its priority level.
    Fifo(Priority),
    /// Real-time with a round-robin time slice at its priority level.
    RoundRobin(Priority),
    /// Weighted fair scheduling, the default.
    Fair(super::Nice),
    /// Only runs when nothing else is runnable.
    Idle,
}

impl SchedPolicy {
    /// Whether a task of this policy belongs to the real-time class.
    pub fn is_real_time(&self) -> bool {
        matches!(self, SchedPolicy::Fifo(_) | SchedPolicy::RoundRobin(_))
    }
}

/// Scheduling state attached to every task, shared between the scheduler
/// classes and the dispatcher.
#[derive(Debug)]
pub struct SchedAttr {
    policy: SpinLock<SchedPolicy>,
    /// Virtual runtime of the fair class, in weighted nanoseconds.
    pub vruntime: AtomicU64,
    /// Remaining round-robin slice of the RT class, in nanoseconds.
    pub rr_slice_ns: AtomicI64,
    /// The CPU this task last ran on.
    pub last_cpu: AtomicU32,
}

impl SchedAttr {
    fn new(policy: SchedPolicy) -> Self {
        Self {
            policy: SpinLock::new(policy),
            vruntime: AtomicU64::new(0),
            rr_slice_ns: AtomicI64::new(0),
            last_cpu: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> SchedPolicy {
        *self.policy.lock()
    }

    pub fn set_policy(&self, policy: SchedPolicy) {
        *self.policy.lock() = policy;
    }
}

/// A task that executes a function to the end.
///
/// Each task is associated with per-task data and an optional user space.
/// If having a user space, the task can switch to the user space to
/// execute user code. Multiple tasks can share a single user space.
pub struct Task {
    func: Box<dyn Fn() + Send + Sync>,
    data: Box<dyn Any + Send + Sync>,
    user_space: Option<Arc<UserSpace>>,
    status: SpinLock<TaskStatus>,
    ctx: UnsafeCell<TaskContext>,
    /// The kernel stack; the task's context lives on it while suspended.
    kstack: kstack::KernelStack,
    link: LinkedListAtomicLink,
    sched: SchedAttr,
    cpu_affinity: SpinLock<CpuSet>,
    fpu_state: SpinLock<FpuState>,
    fpu_used: AtomicBool,
}

// The adapter ties tasks into intrusive run lists.
intrusive_adapter!(pub TaskAdapter = Arc<Task>: Task { link: LinkedListAtomicLink });

// SAFETY: `UnsafeCell<TaskContext>` is only touched during a context
// switch, where the switching CPU has exclusive access to both sides.
unsafe impl Sync for Task {}

impl Task {
    /// Gets the current task.
    ///
    /// # Panics
    ///
    /// Panics if no task is running on the current CPU yet.
    pub fn current() -> Arc<Task> {
        current_task().unwrap()
    }

    pub(crate) fn status(&self) -> SpinLockGuard<'_, TaskStatus> {
        self.status.lock_irq_disabled()
    }

    pub(super) fn ctx_ptr(&self) -> *mut TaskContext {
        self.ctx.get()
    }

    /// Yields execution so that another task may be scheduled.
    pub fn yield_now() {
        super::processor::yield_now();
    }

    /// Makes the task runnable and hands it to the scheduler.
    pub fn run(self: &Arc<Self>) {
        add_task(self.clone());
    }

    /// Returns whether the task has exited.
    pub fn is_exited(&self) -> bool {
        *self.status() == TaskStatus::Exited
    }

    /// Returns the task data.
    pub fn data(&self) -> &(dyn Any + Send + Sync) {
        &*self.data
    }

    /// Returns the user space of this task, if it has one.
    pub fn user_space(&self) -> Option<&Arc<UserSpace>> {
        self.user_space.as_ref()
    }

    /// The scheduling state of the task.
    pub fn sched_attr(&self) -> &SchedAttr {
        &self.sched
    }

    pub fn cpu_affinity(&self) -> CpuSet {
        self.cpu_affinity.lock().clone()
    }

    pub fn set_cpu_affinity(&self, affinity: CpuSet) {
        *self.cpu_affinity.lock() = affinity;
    }

    /// Marks that the task has touched the FPU; its state is preserved
    /// across context switches from now on.
    pub fn set_fpu_used(&self) {
        self.fpu_used.store(true, Relaxed);
    }

    pub fn fpu_used(&self) -> bool {
        self.fpu_used.load(Relaxed)
    }

    pub(super) fn save_fpu(&self) {
        if self.fpu_used() {
            self.fpu_state.lock().save();
        }
    }

    pub(super) fn restore_fpu(&self) {
        if self.fpu_used() {
            self.fpu_state.lock().restore();
        }
    }

    /// Transitions a woken task to runnable, enqueueing it if it was fully
    /// asleep. Used by wakers; loses no wakeups when racing with the
    /// sleep path.
    pub(crate) fn wake(self: &Arc<Self>) {
        let mut status = self.status();
        match *status {
            TaskStatus::Sleepy => {
                *status = TaskStatus::Runnable;
            }
            TaskStatus::Sleeping => {
                *status = TaskStatus::Runnable;
                // Avoid holding the lock while enqueueing.
                drop(status);
                add_task(self.clone());
            }
            _ => (),
        }
    }

    /// Announces the intent to sleep; the next `schedule_current()` puts
    /// the task fully asleep unless a wake-up intervenes.
    pub(crate) fn set_sleepy(&self) {
        let mut status = self.status();
        if *status == TaskStatus::Runnable {
            *status = TaskStatus::Sleepy;
        }
    }

    pub(crate) fn set_runnable(&self) {
        let mut status = self.status();
        if *status == TaskStatus::Sleepy {
            *status = TaskStatus::Runnable;
        }
    }

    /// Terminates the task.
    pub fn exit(&self) -> ! {
        *self.status() = TaskStatus::Exited;
        schedule_current();
        unreachable!()
    }
}

/// The status of a task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum TaskStatus {
    /// The task is runnable.
    Runnable,
    /// The task is about to sleep but still runs in the foreground.
    Sleepy,
    /// The task is sleeping in the background.
    Sleeping,
    /// The task has exited.
    Exited,
}

/// Options to create or spawn a new task.
pub struct TaskOptions {
    func: Option<Box<dyn Fn() + Send + Sync>>,
    data: Option<Box<dyn Any + Send + Sync>>,
    user_space: Option<Arc<UserSpace>>,
    policy: SchedPolicy,
    cpu_affinity: CpuSet,
}

impl TaskOptions {
    /// Creates a set of options for a task running `func`.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            func: Some(Box::new(func)),
            data: None,
            user_space: None,
            policy: SchedPolicy::Fair(0),
            cpu_affinity: CpuSet::new_full(),
        }
    }

    pub fn data<T>(mut self, data: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.data = Some(Box::new(data));
        self
    }

    /// Sets the user space associated with the task.
    pub fn user_space(mut self, user_space: Option<Arc<UserSpace>>) -> Self {
        self.user_space = user_space;
        self
    }

    /// Sets the scheduling policy of the task.
    pub fn policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cpu_affinity(mut self, cpu_affinity: CpuSet) -> Self {
        self.cpu_affinity = cpu_affinity;
        self
    }

    /// Builds a new task without running it immediately.
    pub fn build(self) -> Result<Arc<Task>> {
        /// All tasks enter here; the function runs to completion and the
        /// task exits.
        extern "C" fn kernel_task_entry() {
            let current = Task::current();
            (current.func)();
            current.exit();
        }

        let mut new_task = Task {
            func: self.func.unwrap(),
            data: self.data.unwrap_or_else(|| Box::new(())),
            user_space: self.user_space,
            status: SpinLock::new(TaskStatus::Runnable),
            ctx: UnsafeCell::new(TaskContext::new()),
            kstack: kstack::acquire()?,
            link: LinkedListAtomicLink::new(),
            sched: SchedAttr::new(self.policy),
            cpu_affinity: SpinLock::new(self.cpu_affinity),
            fpu_state: SpinLock::new(FpuState::new()),
            fpu_used: AtomicBool::new(false),
        };

        let ctx = new_task.ctx.get_mut();
        ctx.ip = kernel_task_entry as usize;
        // Reserve space for the fake return address and keep the stack
        // pointer 16-byte aligned per the System V AMD64 ABI.
        ctx.regs.sp = (new_task.kstack.end_vaddr() - 16) as u64;

        Ok(Arc::new(new_task))
    }

    /// Builds a new task and runs it immediately.
    pub fn spawn(self) -> Result<Arc<Task>> {
        let task = self.build()?;
        task.run();
        Ok(task)
    }
}
