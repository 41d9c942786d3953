// SPDX-License-Identifier: MPL-2.0

//! Interrupt management: local IRQ control, IRQ lines, and the kernel
//! exception table.

pub mod extable;
mod irq;

pub use irq::{dispatch, IrqCallbackHandle, IrqLine};

use crate::arch::irq as arch_irq;

pub(crate) fn init() {
    irq::init();
}

/// Disables all IRQs on the current CPU (i.e., locally).
///
/// This function returns a guard object, which will automatically restore
/// the former state of IRQs (enabled or disabled) when it is dropped.
#[must_use]
pub fn disable_local() -> DisabledLocalIrqGuard {
    DisabledLocalIrqGuard::new()
}

/// A guard for disabled local IRQs.
pub struct DisabledLocalIrqGuard {
    was_enabled: bool,
    // Prevent sending the guard to another CPU's context.
    _marker: core::marker::PhantomData<*mut ()>,
}

impl DisabledLocalIrqGuard {
    fn new() -> Self {
        let was_enabled = arch_irq::is_local_enabled();
        if was_enabled {
            arch_irq::disable_local();
        }
        Self {
            was_enabled,
            _marker: core::marker::PhantomData,
        }
    }

    /// Transfers the saved IRQ status to a new guard, leaving `self`
    /// with nothing to restore.
    pub fn transfer_to(&mut self) -> Self {
        let was_enabled = self.was_enabled;
        self.was_enabled = false;
        Self {
            was_enabled,
            _marker: core::marker::PhantomData,
        }
    }
}

impl Drop for DisabledLocalIrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            arch_irq::enable_local();
        }
    }
}

/// The register file pushed on the kernel stack when a trap is taken.
///
/// The layout matches the interrupt entry stubs: general registers in
/// reverse push order, then the hardware-pushed error code and `iret`
/// frame.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
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
    pub trap_num: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub user_rsp: u64,
    pub ss: u64,
}
