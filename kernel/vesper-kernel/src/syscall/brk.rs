// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

pub fn sys_brk(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let new_brk = args[0] as Vaddr;
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    let request = if new_brk == 0 { None } else { Some(new_brk) };
    // A failed move reports the unchanged break, per convention.
    let brk = vmar.brk(request).or_else(|_| vmar.brk(None))?;
    Ok(brk as isize)
}
