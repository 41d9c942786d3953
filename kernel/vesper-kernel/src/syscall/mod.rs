// SPDX-License-Identifier: MPL-2.0

//! The syscall surface.
//!
//! Numbering follows the System-V x86-64 convention. The core owns the
//! memory-management, task-lifecycle, and signal-frame calls; everything
//! else is forwarded to the registered delegate (the filesystem and
//! driver layers) or answered with `ENOSYS`.

mod brk;
mod clone;
mod exit;
mod getpid;
mod kill;
mod mmap;
mod mprotect;
mod mremap;
mod munmap;
mod sched_yield;
mod sigaction;
mod sigprocmask;
mod sigreturn;
mod wait4;

use spin::Once;
use vesper_frame::user::{UserContext, UserSpace};

use crate::{prelude::*, process::Process};

pub const SYS_MMAP: u64 = 9;
pub const SYS_MPROTECT: u64 = 10;
pub const SYS_MUNMAP: u64 = 11;
pub const SYS_BRK: u64 = 12;
pub const SYS_RT_SIGACTION: u64 = 13;
pub const SYS_RT_SIGPROCMASK: u64 = 14;
pub const SYS_RT_SIGRETURN: u64 = 15;
pub const SYS_MREMAP: u64 = 25;
pub const SYS_SCHED_YIELD: u64 = 24;
pub const SYS_GETPID: u64 = 39;
pub const SYS_CLONE: u64 = 56;
pub const SYS_FORK: u64 = 57;
pub const SYS_EXECVE: u64 = 59;
pub const SYS_EXIT: u64 = 60;
pub const SYS_WAIT4: u64 = 61;
pub const SYS_KILL: u64 = 62;
pub const SYS_TKILL: u64 = 200;
pub const SYS_TGKILL: u64 = 234;
pub const SYS_EXIT_GROUP: u64 = 231;

/// Everything a handler may need.
pub struct SyscallContext<'a> {
    pub process: &'a Arc<Process>,
    pub user_ctx: &'a mut UserContext,
}

/// The delegate that picks up every syscall the core does not own.
pub trait SyscallDelegate: Send + Sync {
    fn handle(&self, num: u64, args: [u64; 6], ctx: &mut SyscallContext) -> isize;
}

static DELEGATE: Once<&'static dyn SyscallDelegate> = Once::new();

/// Registers the collaborator handling delegated syscalls.
pub fn set_delegate(delegate: &'static dyn SyscallDelegate) {
    DELEGATE.call_once(|| delegate);
}

/// Dispatches one syscall and returns the value for the user's return
/// register.
pub fn dispatch(num: u64, args: [u64; 6], ctx: &mut SyscallContext) -> isize {
    let result = match num {
        SYS_MMAP => mmap::sys_mmap(args, ctx),
        SYS_MPROTECT => mprotect::sys_mprotect(args, ctx),
        SYS_MUNMAP => munmap::sys_munmap(args, ctx),
        SYS_BRK => brk::sys_brk(args, ctx),
        SYS_MREMAP => mremap::sys_mremap(args, ctx),
        SYS_RT_SIGACTION => sigaction::sys_rt_sigaction(args, ctx),
        SYS_RT_SIGPROCMASK => sigprocmask::sys_rt_sigprocmask(args, ctx),
        SYS_RT_SIGRETURN => sigreturn::sys_rt_sigreturn(args, ctx),
        SYS_SCHED_YIELD => sched_yield::sys_sched_yield(args, ctx),
        SYS_GETPID => getpid::sys_getpid(args, ctx),
        SYS_CLONE => clone::sys_clone(args, ctx),
        SYS_FORK => clone::sys_fork(args, ctx),
        SYS_EXECVE => clone::sys_execve(args, ctx),
        SYS_EXIT | SYS_EXIT_GROUP => exit::sys_exit(args, ctx),
        SYS_WAIT4 => wait4::sys_wait4(args, ctx),
        SYS_KILL | SYS_TKILL | SYS_TGKILL => kill::sys_kill(args, ctx),
        _ => match DELEGATE.get() {
            Some(delegate) => return delegate.handle(num, args, ctx),
            None => Err(Error::new(Errno::ENOSYS)),
        },
    };
    match result {
        Ok(ret) => ret,
        Err(e) => {
            trace!("syscall {} failed: {:?}", num, e);
            e.as_retval()
        }
    }
}

/// Why control came back from user mode.
pub enum UserExit {
    Syscall { num: u64, args: [u64; 6] },
    PageFault(crate::vm::PageFaultInfo),
}

/// The arch entry that drops into user mode with the given context and
/// returns with the exit reason. Registered by the boot layer; on the
/// host a test harness may install a simulation.
pub type UserEntryFn = fn(&mut UserContext) -> UserExit;

static USER_ENTRY: Once<UserEntryFn> = Once::new();

pub fn set_user_entry(entry: UserEntryFn) {
    USER_ENTRY.call_once(|| entry);
}

/// Runs a process's user flow of control: return to user mode, service
/// the next syscall or fault, deliver signals, repeat; preemption is
/// taken on the way back out.
pub fn user_mode_loop(process: &Arc<Process>, user_space: &Arc<UserSpace>) {
    let entry = USER_ENTRY
        .get()
        .expect("no user-mode entry is registered");
    let mut ctx = *user_space.init_ctx();
    loop {
        match entry(&mut ctx) {
            UserExit::Syscall { num, args } => {
                let mut sys_ctx = SyscallContext {
                    process,
                    user_ctx: &mut ctx,
                };
                let ret = dispatch(num, args, &mut sys_ctx);
                ctx.set_syscall_ret(ret as u64);
            }
            UserExit::PageFault(info) => {
                let resolved = process
                    .vmar()
                    .ok_or(Error::new(Errno::EFAULT))
                    .and_then(|vmar| crate::vm::handle_vmar_fault(&vmar, &info));
                if resolved.is_err() {
                    crate::process::signal::force_sig_fault(process, info.addr);
                }
            }
        }
        deliver_pending_signals(process, &mut ctx);
        vesper_frame::task::preempt_if_needed();
        if process.is_zombie() {
            vesper_frame::task::Task::current().exit();
        }
    }
}

/// Delivers at most one pending signal by framing the user context.
#[allow(dead_code)]
fn deliver_pending_signals(process: &Arc<Process>, ctx: &mut UserContext) {
    use crate::process::signal::{SigAction, SIGKILL, SIGSEGV};

    while let Some(signal) = process.sig().dequeue() {
        match process.sig().action_of(signal.num) {
            SigAction::Ignore => continue,
            SigAction::Handler { .. } => {
                let action = process.sig().action_of(signal.num);
                if let Some(vmar) = process.vmar() {
                    if crate::process::signal::setup_signal_frame(&vmar, ctx, signal, &action)
                        .is_ok()
                    {
                        return;
                    }
                }
                // An unframeable handler degenerates to the default.
                crate::process::exit::exit_process(process, 128 + signal.num as i32);
                return;
            }
            SigAction::Default => match signal.num {
                SIGKILL | SIGSEGV => {
                    crate::process::exit::exit_process(process, 128 + signal.num as i32);
                    return;
                }
                _ => {
                    // The default for the rest of the core's signals
                    // (notably SIGCHLD) is to ignore.
                    continue;
                }
            },
        }
    }
}
