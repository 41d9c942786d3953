// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::{prelude::*, process::signal::SigAction};

/// The user-visible `struct sigaction` layout (x86-64).
#[derive(Clone, Copy, Default)]
#[repr(C)]
struct UserSigAction {
    handler: u64,
    flags: u64,
    restorer: u64,
    mask: u64,
}

const SIG_DFL: u64 = 0;
const SIG_IGN: u64 = 1;

pub fn sys_rt_sigaction(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let signum = args[0] as u8;
    let new_ptr = args[1] as Vaddr;
    let old_ptr = args[2] as Vaddr;
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;

    let new_action = if new_ptr != 0 {
        let user: UserSigAction = vmar.read_val(new_ptr)?;
        Some(match user.handler {
            SIG_DFL => SigAction::Default,
            SIG_IGN => SigAction::Ignore,
            addr => SigAction::Handler {
                handler_addr: addr as Vaddr,
                restorer_addr: user.restorer as Vaddr,
                mask: user.mask,
            },
        })
    } else {
        None
    };

    let old = match new_action {
        Some(action) => ctx.process.sig().set_action(signum, action)?,
        None => ctx.process.sig().action_of(signum),
    };

    if old_ptr != 0 {
        let user_old = match old {
            SigAction::Default => UserSigAction::default(),
            SigAction::Ignore => UserSigAction {
                handler: SIG_IGN,
                ..Default::default()
            },
            SigAction::Handler {
                handler_addr,
                restorer_addr,
                mask,
            } => UserSigAction {
                handler: handler_addr as u64,
                flags: 0,
                restorer: restorer_addr as u64,
                mask,
            },
        };
        vmar.write_val(old_ptr, &user_old)?;
    }
    Ok(0)
}
