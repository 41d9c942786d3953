// SPDX-License-Identifier: MPL-2.0

//! Lazy FPU state preservation.

use alloc::boxed::Box;

/// The 512-byte FXSAVE area. Saved only for tasks that used the FPU and
/// restored on their first use after a switch-in.
#[derive(Debug)]
pub struct FpuState {
    area: Box<FxSaveArea>,
}

#[repr(C, align(16))]
#[derive(Debug)]
struct FxSaveArea([u8; 512]);

impl Default for FpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl FpuState {
    pub fn new() -> Self {
        Self {
            area: Box::new(FxSaveArea([0; 512])),
        }
    }

    pub fn save(&mut self) {
        // SAFETY: The area is 16-byte aligned and 512 bytes long.
        unsafe { core::arch::x86_64::_fxsave64(self.area.0.as_mut_ptr()) }
    }

    pub fn restore(&self) {
        // SAFETY: The area is 16-byte aligned and holds a state produced
        // by `save` (or the all-zero initial image).
        unsafe { core::arch::x86_64::_fxrstor64(self.area.0.as_ptr()) }
    }
}
