// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

const SIG_BLOCK: u64 = 0;
const SIG_UNBLOCK: u64 = 1;
const SIG_SETMASK: u64 = 2;

pub fn sys_rt_sigprocmask(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let how = args[0];
    let set_ptr = args[1] as Vaddr;
    let old_ptr = args[2] as Vaddr;
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;

    let current = ctx.process.sig().blocked();
    if set_ptr != 0 {
        let set: u64 = vmar.read_val(set_ptr)?;
        let new_mask = match how {
            SIG_BLOCK => current | set,
            SIG_UNBLOCK => current & !set,
            SIG_SETMASK => set,
            _ => return_errno_with_message!(Errno::EINVAL, "bad sigprocmask how"),
        };
        ctx.process.sig().set_blocked(new_mask);
    }
    if old_ptr != 0 {
        vmar.write_val(old_ptr, &current)?;
    }
    Ok(0)
}
