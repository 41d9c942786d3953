// SPDX-License-Identifier: MPL-2.0

//! Virtual memory: address-space regions, page-backed objects, and the
//! page-fault policy.

pub mod page_fault;
pub mod perms;
#[cfg(test)]
mod test;
pub mod vmar;
pub mod vmo;

pub use self::{
    page_fault::{handle_vmar_fault, PageFaultInfo},
    perms::VmFlags,
    vmar::Vmar,
    vmo::Vmo,
};
