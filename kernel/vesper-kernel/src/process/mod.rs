// SPDX-License-Identifier: MPL-2.0

//! Processes: records, lifecycle, and the global table.

pub mod clone;
pub mod exit;
pub mod pid;
pub mod process_table;
mod resources;
pub mod signal;
#[cfg(test)]
mod test;
pub mod wait;

use core::sync::atomic::{AtomicI32, Ordering};

use vesper_frame::{sync::WaitQueue, task::Task};

pub use self::{
    clone::{copy_process, fork, CloneFlags},
    pid::{Pid, PidNamespace},
    resources::{FileTable, FsContext},
    signal::SigState,
};
use crate::prelude::*;

/// The lifecycle state of a process.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    /// Alive; its task(s) may run.
    Live,
    /// Tearing down; resources are being released.
    Exiting,
    /// Dead, waiting to be reaped by its parent.
    Zombie,
}

/// A process.
pub struct Process {
    /// The globally unique identifier, from the root namespace.
    pid: Pid,
    /// The identifier inside the process's own namespace.
    pid_in_ns: Pid,
    pid_ns: Arc<PidNamespace>,
    state: SpinLock<ProcessState>,
    exit_code: AtomicI32,
    /// The main task; `None` for records not yet attached to a task.
    task: SpinLock<Option<Arc<Task>>>,
    /// Weak for reaping purposes: the child does not keep the parent
    /// alive.
    parent: SpinLock<Weak<Process>>,
    children: SpinLock<BTreeMap<Pid, Arc<Process>>>,
    /// `None` for kernel-thread processes and after exit.
    vmar: SpinLock<Option<Arc<crate::vm::Vmar>>>,
    files: SpinLock<Option<Arc<FileTable>>>,
    fs: SpinLock<Option<Arc<FsContext>>>,
    sig: SigState,
    /// Parents sleep here for `wait`.
    children_wait: WaitQueue,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    fn new(
        pid: Pid,
        pid_in_ns: Pid,
        pid_ns: Arc<PidNamespace>,
        parent: Weak<Process>,
        vmar: Option<Arc<crate::vm::Vmar>>,
        files: Arc<FileTable>,
        fs: Arc<FsContext>,
        sig: SigState,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            pid_in_ns,
            pid_ns,
            state: SpinLock::new(ProcessState::Live),
            exit_code: AtomicI32::new(0),
            task: SpinLock::new(None),
            parent: SpinLock::new(parent),
            children: SpinLock::new(BTreeMap::new()),
            vmar: SpinLock::new(vmar),
            files: SpinLock::new(Some(files)),
            fs: SpinLock::new(Some(fs)),
            sig,
            children_wait: WaitQueue::new(),
        })
    }

    /// The globally unique PID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The PID as seen inside the process's own namespace.
    pub fn pid_in_ns(&self) -> Pid {
        self.pid_in_ns
    }

    pub fn pid_ns(&self) -> &Arc<PidNamespace> {
        &self.pid_ns
    }

    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    pub(super) fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == ProcessState::Zombie
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    pub fn task(&self) -> Option<Arc<Task>> {
        self.task.lock().clone()
    }

    pub(crate) fn set_task(&self, task: Arc<Task>) {
        *self.task.lock() = Some(task);
    }

    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Process>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub fn children(&self) -> &SpinLock<BTreeMap<Pid, Arc<Process>>> {
        &self.children
    }

    pub fn vmar(&self) -> Option<Arc<crate::vm::Vmar>> {
        self.vmar.lock().clone()
    }

    pub(crate) fn take_vmar(&self) -> Option<Arc<crate::vm::Vmar>> {
        self.vmar.lock().take()
    }

    pub fn files(&self) -> Option<Arc<FileTable>> {
        self.files.lock().clone()
    }

    pub fn fs(&self) -> Option<Arc<FsContext>> {
        self.fs.lock().clone()
    }

    pub fn sig(&self) -> &SigState {
        &self.sig
    }

    pub fn children_wait(&self) -> &WaitQueue {
        &self.children_wait
    }

    /// Makes the process's main task runnable.
    pub fn run(&self) {
        let task = self.task().expect("process has no task");
        task.run();
    }
}

impl Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// The process of the current task, if the task belongs to one.
pub fn current() -> Option<Arc<Process>> {
    let task = vesper_frame::task::current_task()?;
    task.data().downcast_ref::<Weak<Process>>()?.upgrade()
}

/// Initializes process management: the root PID namespace and the table.
pub fn init() {
    clone::init_root_namespace();
}
