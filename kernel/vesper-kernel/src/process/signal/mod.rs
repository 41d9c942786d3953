// SPDX-License-Identifier: MPL-2.0

//! Minimal signal machinery: dispositions, pending queues, and the
//! user-stack signal frame.

use vesper_frame::user::UserContext;

use super::Process;
use crate::{prelude::*, vm::Vmar};

pub const SIGKILL: u8 = 9;
pub const SIGSEGV: u8 = 11;
pub const SIGCHLD: u8 = 17;

pub const NR_SIGNALS: usize = 64;

/// A pending signal instance.
#[derive(Clone, Copy, Debug)]
pub struct Signal {
    pub num: u8,
    /// The faulting address for fault signals, zero otherwise.
    pub fault_addr: Vaddr,
}

/// What the process wants done with one signal number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigAction {
    Default,
    Ignore,
    Handler {
        handler_addr: Vaddr,
        restorer_addr: Vaddr,
        mask: u64,
    },
}

/// Per-process signal state.
pub struct SigState {
    dispositions: SpinLock<[SigAction; NR_SIGNALS]>,
    pending: SpinLock<VecDeque<Signal>>,
    blocked: SpinLock<u64>,
}

impl Default for SigState {
    fn default() -> Self {
        Self::new()
    }
}

impl SigState {
    pub fn new() -> Self {
        Self {
            dispositions: SpinLock::new([SigAction::Default; NR_SIGNALS]),
            pending: SpinLock::new(VecDeque::new()),
            blocked: SpinLock::new(0),
        }
    }

    /// A copy sharing nothing; used by plain `fork`.
    pub fn clone_dispositions(&self) -> Self {
        Self {
            dispositions: SpinLock::new(*self.dispositions.lock()),
            pending: SpinLock::new(VecDeque::new()),
            blocked: SpinLock::new(*self.blocked.lock()),
        }
    }

    pub fn action_of(&self, num: u8) -> SigAction {
        self.dispositions.lock()[num as usize]
    }

    pub fn set_action(&self, num: u8, action: SigAction) -> Result<SigAction> {
        if num as usize >= NR_SIGNALS {
            return_errno_with_message!(Errno::EINVAL, "bad signal number");
        }
        if num == SIGKILL {
            return_errno_with_message!(Errno::EINVAL, "SIGKILL cannot be redirected");
        }
        let mut dispositions = self.dispositions.lock();
        let old = dispositions[num as usize];
        dispositions[num as usize] = action;
        Ok(old)
    }

    pub fn blocked(&self) -> u64 {
        *self.blocked.lock()
    }

    pub fn set_blocked(&self, mask: u64) -> u64 {
        let mut blocked = self.blocked.lock();
        let old = *blocked;
        // SIGKILL is never maskable.
        *blocked = mask & !(1 << SIGKILL);
        old
    }

    pub fn enqueue(&self, signal: Signal) {
        self.pending.lock().push_back(signal);
    }

    /// Takes the next deliverable (unblocked) pending signal.
    pub fn dequeue(&self) -> Option<Signal> {
        let blocked = self.blocked();
        let mut pending = self.pending.lock();
        let pos = pending
            .iter()
            .position(|s| blocked & (1 << s.num) == 0)?;
        pending.remove(pos)
    }

    pub fn has_pending(&self) -> bool {
        let blocked = self.blocked();
        self.pending
            .lock()
            .iter()
            .any(|s| blocked & (1 << s.num) == 0)
    }
}

/// Sends `signal` to `process`.
pub fn send_signal(process: &Process, signal: Signal) {
    if process.sig().action_of(signal.num) == SigAction::Ignore && signal.num != SIGKILL {
        return;
    }
    process.sig().enqueue(signal);
}

/// Raises a fault signal against the current context; used by the fault
/// path when an access cannot be resolved.
pub fn force_sig_fault(process: &Process, fault_addr: Vaddr) {
    // Even an ignored SIGSEGV must terminate on a real fault; forcing
    // resets the disposition to the default.
    let _ = process.sig().set_action(SIGSEGV, SigAction::Default);
    process.sig().enqueue(Signal {
        num: SIGSEGV,
        fault_addr,
    });
}

/// The saved context pushed on the user stack for a handler, restored by
/// `sigreturn`.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SignalFrame {
    pub ret_addr: u64,
    pub saved: UserContext,
    pub signum: u64,
}

/// Redirects `ctx` to run the handler of `signal`, pushing the saved
/// register context onto the user stack.
pub fn setup_signal_frame(
    vmar: &Arc<Vmar>,
    ctx: &mut UserContext,
    signal: Signal,
    action: &SigAction,
) -> Result<()> {
    let SigAction::Handler {
        handler_addr,
        restorer_addr,
        ..
    } = action
    else {
        return_errno_with_message!(Errno::EINVAL, "no handler to frame");
    };

    let frame = SignalFrame {
        ret_addr: *restorer_addr as u64,
        saved: *ctx,
        signum: signal.num as u64,
    };
    // A 128-byte red zone below the interrupted stack pointer stays
    // untouched, then the frame, 16-byte aligned.
    let frame_top = (ctx.rsp as usize - 128 - core::mem::size_of::<SignalFrame>()) & !0xf;
    vmar.write_val(frame_top, &frame)?;

    ctx.rsp = frame_top as u64;
    ctx.rip = *handler_addr as u64;
    ctx.rdi = signal.num as u64;
    Ok(())
}

/// The `sigreturn` path: restores the context saved by
/// [`setup_signal_frame`]. The frame sits at the current stack pointer
/// minus the return-address slot the handler consumed.
pub fn restore_signal_frame(vmar: &Arc<Vmar>, ctx: &mut UserContext) -> Result<()> {
    let frame_addr = ctx.rsp as usize - core::mem::size_of::<u64>();
    let frame: SignalFrame = vmar.read_val(frame_addr)?;
    *ctx = frame.saved;
    Ok(())
}

#[cfg(test)]
mod test {
    use vesper_frame::mm::sim;

    use super::*;
    use crate::vm::VmFlags;

    #[test]
    fn frame_roundtrip_redirects_and_restores() {
        sim::init();
        let vmar = Vmar::new().unwrap();
        vmar.map_range(
            Some(0x100000),
            0x4000,
            PAGE_SIZE,
            VmFlags::READ | VmFlags::WRITE | VmFlags::USER,
            None,
        )
        .unwrap();

        let mut ctx = UserContext::default();
        ctx.rsp = 0x104000 - 8;
        ctx.rip = 0xdead_0000;
        ctx.rax = 42;

        let action = SigAction::Handler {
            handler_addr: 0x7000_0000,
            restorer_addr: 0x7000_1000,
            mask: 0,
        };
        let signal = Signal {
            num: SIGSEGV,
            fault_addr: 0,
        };
        setup_signal_frame(&vmar, &mut ctx, signal, &action).unwrap();
        assert_eq!(ctx.rip, 0x7000_0000);
        assert_eq!(ctx.rdi, SIGSEGV as u64);
        assert!(ctx.rsp < 0x104000 - 8 - 128);

        // The handler returns through the restorer, which issues
        // `sigreturn` with the frame's return slot consumed.
        let mut at_restore = ctx;
        at_restore.rsp += 8;
        restore_signal_frame(&vmar, &mut at_restore).unwrap();
        assert_eq!(at_restore.rip, 0xdead_0000);
        assert_eq!(at_restore.rax, 42);
        assert_eq!(at_restore.rsp, 0x104000 - 8);
    }

    #[test]
    fn blocked_signals_stay_pending() {
        let state = SigState::new();
        state.set_blocked(1 << SIGCHLD);
        state.enqueue(Signal {
            num: SIGCHLD,
            fault_addr: 0,
        });
        assert!(!state.has_pending());
        assert!(state.dequeue().is_none());

        state.set_blocked(0);
        assert!(state.has_pending());
        assert_eq!(state.dequeue().unwrap().num, SIGCHLD);
    }
}
