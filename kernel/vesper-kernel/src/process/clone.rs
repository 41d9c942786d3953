// SPDX-License-Identifier: MPL-2.0

//! `copy_process`: the unified kernel-thread / fork / clone entry.

use spin::Once;
use vesper_frame::{
    task::{SchedPolicy, Task, TaskOptions},
    user::{UserContext, UserSpace},
};

use super::{
    pid::PidNamespace, process_table, resources::{FileTable, FsContext}, Pid, Process, SigState,
};
use crate::{domain, prelude::*, vm::Vmar};

bitflags! {
    pub struct CloneFlags: u32 {
        const CLONE_VM      = 0x0000_0100; /* Share the address space. */
        const CLONE_FS      = 0x0000_0200; /* Share the fs context. */
        const CLONE_FILES   = 0x0000_0400; /* Share the file table. */
        const CLONE_SIGHAND = 0x0000_0800; /* Share signal dispositions. */
        const CLONE_THREAD  = 0x0001_0000; /* Same thread group. */
        const CLONE_NEWPID  = 0x2000_0000; /* New PID namespace. */
    }
}

impl CloneFlags {
    fn check_supported(&self) -> Result<()> {
        let supported = CloneFlags::CLONE_VM
            | CloneFlags::CLONE_FS
            | CloneFlags::CLONE_FILES
            | CloneFlags::CLONE_SIGHAND
            | CloneFlags::CLONE_NEWPID;
        let unsupported = *self - supported;
        if !unsupported.is_empty() {
            return_errno_with_message!(Errno::EINVAL, "unsupported clone flags");
        }
        Ok(())
    }
}

static ROOT_PID_NS: Once<Arc<PidNamespace>> = Once::new();

pub(super) fn init_root_namespace() {
    ROOT_PID_NS.call_once(PidNamespace::new_root);
}

pub fn root_pid_ns() -> &'static Arc<PidNamespace> {
    ROOT_PID_NS.get().expect("PID namespaces are not initialized")
}

/// Creates a process record plus its main task, sharing or copying each
/// resource according to `flags`. The task is built but not yet made
/// runnable; the caller decides when it first runs.
///
/// With no parent this creates a namespace-root process (an init or a
/// kernel-thread holder).
pub fn copy_process(
    flags: CloneFlags,
    parent: Option<&Arc<Process>>,
    user_ctx: Option<&UserContext>,
    stack_top: Option<Vaddr>,
) -> Result<Arc<Process>> {
    flags.check_supported()?;

    // PID, from the right namespace.
    let pid_ns = match parent {
        Some(parent) if flags.contains(CloneFlags::CLONE_NEWPID) => {
            PidNamespace::new_child(parent.pid_ns())
        }
        Some(parent) => parent.pid_ns().clone(),
        None => root_pid_ns().clone(),
    };
    // The global identity comes from the root namespace; nested
    // namespaces additionally assign their own view of the PID.
    let (pid, pid_in_ns) = if pid_ns.level() == 0 {
        let pid = pid_ns.alloc_pid()?;
        (pid, pid)
    } else {
        let pid = root_pid_ns().alloc_pid()?;
        let local = match pid_ns.alloc_pid() {
            Ok(local) => local,
            Err(e) => {
                root_pid_ns().release_pid(pid);
                return Err(e);
            }
        };
        (pid, local)
    };

    // Address space: share, deep-copy with COW, or a fresh one for a
    // namespace root.
    let vmar = match parent {
        Some(parent) => {
            let parent_vmar = parent.vmar();
            if flags.contains(CloneFlags::CLONE_VM) {
                parent_vmar
            } else {
                match parent_vmar {
                    Some(parent_vmar) => Some(parent_vmar.fork()?),
                    None => None,
                }
            }
        }
        None => Some(Vmar::new()?),
    };

    // Files and fs context: share bumps the reference, copy duplicates.
    let files = match parent {
        Some(parent) => {
            let parent_files = parent
                .files()
                .ok_or(Error::with_message(Errno::ESRCH, "parent has exited"))?;
            if flags.contains(CloneFlags::CLONE_FILES) {
                parent_files
            } else {
                Arc::new(parent_files.deep_clone())
            }
        }
        None => Arc::new(FileTable::new()),
    };
    let fs = match parent {
        Some(parent) => {
            let parent_fs = parent
                .fs()
                .ok_or(Error::with_message(Errno::ESRCH, "parent has exited"))?;
            if flags.contains(CloneFlags::CLONE_FS) {
                parent_fs
            } else {
                Arc::new(parent_fs.deep_clone())
            }
        }
        None => Arc::new(FsContext::new()),
    };

    // Signal dispositions: shared dispositions are only sound inside a
    // thread group; otherwise copy.
    let sig = match parent {
        Some(parent) => parent.sig().clone_dispositions(),
        None => SigState::new(),
    };

    let parent_weak = parent.map(Arc::downgrade).unwrap_or_default();
    let process = Process::new(
        pid,
        pid_in_ns,
        pid_ns.clone(),
        parent_weak,
        vmar.clone(),
        files,
        fs,
        sig,
    );

    // The child's user context: the parent's interrupt frame with the
    // return value zeroed, optionally on a caller-provided stack.
    let user_space = match (&vmar, user_ctx) {
        (Some(vmar), Some(ctx)) => {
            let mut child_ctx = *ctx;
            child_ctx.set_syscall_ret(0);
            if let Some(sp) = stack_top {
                child_ctx.set_stack_pointer(sp as u64);
            }
            Some(Arc::new(UserSpace::new(vmar.vm_space().clone(), child_ctx)))
        }
        _ => None,
    };

    // The main task: scheduling class, priority, and affinity are
    // inherited from the parent's task.
    let task = {
        let for_task = process.clone();
        // The task's back-pointer is weak so that a reaped process can
        // actually go away.
        let mut options = TaskOptions::new(move || task_entry(&for_task))
            .data(Arc::downgrade(&process))
            .user_space(user_space);
        if let Some(parent_task) = parent.and_then(|p| p.task()) {
            options = options
                .policy(parent_task.sched_attr().policy())
                .cpu_affinity(parent_task.cpu_affinity());
        }
        options.build()?
    };
    process.set_task(task);

    // Make the process visible: the global table, the parent's children
    // list, the namespace reaper slot, the resource domain.
    if pid_ns.reaper().is_none() {
        pid_ns.set_reaper(&process);
    }
    if let Some(parent) = parent {
        parent.children().lock().insert(pid, process.clone());
    }
    process_table::attach(process.clone());
    domain::attach(&process);

    Ok(process)
}

/// The body every process main task starts in: return to user mode, or
/// finish immediately for processes that never got a user context.
fn task_entry(process: &Arc<Process>) {
    let task = Task::current();
    if let Some(user_space) = task.user_space() {
        crate::syscall::user_mode_loop(process, user_space);
    }
}

/// `fork`: duplicate the current process, copying the interrupt frame so
/// the child resumes at the same point with a zero return value.
pub fn fork(parent: &Arc<Process>, parent_ctx: &UserContext) -> Result<Pid> {
    let child = copy_process(CloneFlags::empty(), Some(parent), Some(parent_ctx), None)?;
    let pid = child.pid();
    child.run();
    Ok(pid)
}

/// `clone` with explicit flags and an optional new stack.
pub fn clone_process(
    parent: &Arc<Process>,
    parent_ctx: &UserContext,
    flags: CloneFlags,
    stack_top: Option<Vaddr>,
) -> Result<Pid> {
    let child = copy_process(flags, Some(parent), Some(parent_ctx), stack_top)?;
    let pid = child.pid();
    child.run();
    Ok(pid)
}

/// Spawns a process-less kernel flow of control. Kernel threads share
/// the kernel address space and exit by returning from `func`.
pub fn kthread_spawn<F>(func: F, policy: SchedPolicy) -> Result<Arc<Task>>
where
    F: Fn() + Send + Sync + 'static,
{
    Ok(TaskOptions::new(func).policy(policy).spawn()?)
}
