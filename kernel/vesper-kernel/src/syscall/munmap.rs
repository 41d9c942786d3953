// SPDX-License-Identifier: MPL-2.0

use align_ext::AlignExt;

use super::SyscallContext;
use crate::prelude::*;

pub fn sys_munmap(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let addr = args[0] as Vaddr;
    let len = args[1] as usize;
    if addr % PAGE_SIZE != 0 || len == 0 {
        return_errno_with_message!(Errno::EINVAL, "bad unmap range");
    }
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    vmar.unmap_range(addr..addr + len.align_up(PAGE_SIZE))?;
    Ok(0)
}
