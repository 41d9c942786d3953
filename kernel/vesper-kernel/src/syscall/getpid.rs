// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

pub fn sys_getpid(_args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    Ok(ctx.process.pid() as isize)
}
