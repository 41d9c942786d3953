// SPDX-License-Identifier: MPL-2.0

//! Architecture-specific glue.
//!
//! Exactly one backend is compiled in. The `x86` backend drives real
//! hardware; the `host` backend supplies inert stand-ins with the same
//! interface so the portable parts of the frame can be built and tested
//! on the development machine.

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        pub mod x86;
        pub(crate) use x86 as imp;
    } else {
        pub mod host;
        pub(crate) use host as imp;
    }
}

pub use imp::{console, context, cpu, fpu, irq, mm, rng};

/// The inter-processor interrupt kinds the frame itself relies on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum IpiVector {
    /// Ask the target CPU to flush its translation caches.
    TlbShootdown = 0xfc,
    /// Ask the target CPU to reschedule at the next opportunity.
    Reschedule = 0xfd,
}
