// SPDX-License-Identifier: MPL-2.0

use vesper_frame::mm::page_table::PtFlags;

use crate::prelude::*;

bitflags! {
    /// The attributes of a virtual memory area.
    pub struct VmFlags: u32 {
        /// Reads through the area are allowed.
        const READ      = 1 << 0;
        /// Writes through the area are allowed.
        const WRITE     = 1 << 1;
        /// Instruction fetches from the area are allowed.
        const EXEC      = 1 << 2;
        /// User mode may access the area.
        const USER      = 1 << 3;
        /// Writes are shared with every mapper of the backing object
        /// instead of being copied on write.
        const SHARED    = 1 << 4;
        /// Pages are pinned; the area is never unmapped implicitly.
        const LOCKED    = 1 << 5;
        /// Prefer 2 MiB mappings when faulting the area.
        const HUGEPAGE  = 1 << 6;
        /// Anonymous memory, zero-filled on first touch.
        const ANON      = 1 << 7;
        /// The area grows downward (a stack).
        const GROWSDOWN = 1 << 8;
        /// Device memory; untouched by the page-fault policy.
        const IO        = 1 << 9;
        /// Raw frame mapping without a backing object.
        const PFNMAP    = 1 << 10;
    }
}

impl VmFlags {
    /// Whether an access of the given kind is permitted.
    pub fn allows(&self, write: bool, instruction: bool) -> bool {
        if write && !self.contains(VmFlags::WRITE) {
            return false;
        }
        if instruction && !self.contains(VmFlags::EXEC) {
            return false;
        }
        self.contains(VmFlags::READ) || write
    }

    /// The page-table attributes for a fresh leaf of the area.
    /// Copy-on-write state is applied separately by the fault policy.
    pub fn pt_flags(&self) -> PtFlags {
        let mut flags = PtFlags::empty();
        if self.contains(VmFlags::WRITE) {
            flags |= PtFlags::WRITABLE;
        }
        if self.contains(VmFlags::USER) {
            flags |= PtFlags::USER;
        }
        if !self.contains(VmFlags::EXEC) {
            flags |= PtFlags::NO_EXECUTE;
        }
        if self.contains(VmFlags::IO) {
            flags |= PtFlags::NO_CACHE;
        }
        flags
    }
}
