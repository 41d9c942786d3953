// SPDX-License-Identifier: MPL-2.0

use spin::Once;

use super::SyscallContext;
use crate::{prelude::*, process::CloneFlags};

pub fn sys_fork(_args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let pid = crate::process::fork(ctx.process, ctx.user_ctx)?;
    Ok(pid as isize)
}

pub fn sys_clone(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let flags = CloneFlags::from_bits_truncate((args[0] & 0xffff_ffff) as u32);
    let stack = args[1] as Vaddr;
    let stack_top = if stack == 0 { None } else { Some(stack) };
    let pid = crate::process::clone::clone_process(ctx.process, ctx.user_ctx, flags, stack_top)?;
    Ok(pid as isize)
}

/// The program loader the filesystem layer registers; `execve` delegates
/// the image parsing and stack setup to it.
pub trait ProgramLoader: Send + Sync {
    /// Loads `path` into the (already cleared) address space and returns
    /// the entry point and initial stack pointer.
    fn load(
        &self,
        path: &str,
        vmar: &Arc<crate::vm::Vmar>,
        argv: &[&str],
        envp: &[&str],
    ) -> Result<(Vaddr, Vaddr)>;
}

static PROGRAM_LOADER: Once<&'static dyn ProgramLoader> = Once::new();

pub fn set_program_loader(loader: &'static dyn ProgramLoader) {
    PROGRAM_LOADER.call_once(|| loader);
}

pub fn sys_execve(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let path_ptr = args[0] as Vaddr;
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    let loader = PROGRAM_LOADER
        .get()
        .ok_or(Error::with_message(Errno::ENOSYS, "no program loader"))?;

    // Fetch the path before the old image disappears.
    let mut path_buf = [0u8; 256];
    vmar.read_bytes(path_ptr, &mut path_buf)?;
    let len = path_buf.iter().position(|&b| b == 0).unwrap_or(0);
    let path = core::str::from_utf8(&path_buf[..len])
        .map_err(|_| Error::with_message(Errno::EINVAL, "bad path encoding"))?
        .to_string();

    // The point of no return: the old image is gone.
    vmar.clear();
    let (entry, stack_top) = loader.load(&path, &vmar, &[], &[])?;
    ctx.user_ctx.set_instruction_pointer(entry as u64);
    ctx.user_ctx.set_stack_pointer(stack_top as u64);
    Ok(0)
}
