// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::{prelude::*, process::signal::restore_signal_frame};

pub fn sys_rt_sigreturn(_args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    restore_signal_frame(&vmar, ctx.user_ctx)?;
    // The return value register was restored with the rest of the
    // context; report it unchanged.
    Ok(ctx.user_ctx.rax as isize)
}
