// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

const MREMAP_MAYMOVE: u64 = 1;

pub fn sys_mremap(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let old_addr = args[0] as Vaddr;
    let old_size = args[1] as usize;
    let new_size = args[2] as usize;
    let may_move = args[3] & MREMAP_MAYMOVE != 0;

    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    let new_addr = vmar.remap(old_addr, old_size, new_size, may_move)?;
    Ok(new_addr as isize)
}
