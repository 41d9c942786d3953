// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

pub fn sys_sched_yield(_args: [u64; 6], _ctx: &mut SyscallContext) -> Result<isize> {
    vesper_frame::task::yield_now();
    Ok(0)
}
