// SPDX-License-Identifier: MPL-2.0

//! User space.

use alloc::sync::Arc;

use crate::mm::space::VmSpace;

/// The user-visible register file, saved on kernel entry and restored on
/// the way back to user mode.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct UserContext {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub fs_base: u64,
}

impl UserContext {
    /// The value a syscall returns to user mode, kept in `rax`.
    pub fn set_syscall_ret(&mut self, ret: u64) {
        self.rax = ret;
    }

    pub fn set_instruction_pointer(&mut self, ip: u64) {
        self.rip = ip;
    }

    pub fn set_stack_pointer(&mut self, sp: u64) {
        self.rsp = sp;
    }
}

/// A user space: an address space plus the register context user code
/// (re-)enters with. Multiple tasks can share a single user space.
pub struct UserSpace {
    vm_space: Arc<VmSpace>,
    init_ctx: UserContext,
}

impl UserSpace {
    pub fn new(vm_space: Arc<VmSpace>, init_ctx: UserContext) -> Self {
        Self { vm_space, init_ctx }
    }

    /// Returns the VM address space of this user space.
    pub fn vm_space(&self) -> &Arc<VmSpace> {
        &self.vm_space
    }

    /// Returns the initial user-mode register context.
    pub fn init_ctx(&self) -> &UserContext {
        &self.init_ctx
    }
}
