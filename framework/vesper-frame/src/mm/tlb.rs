// SPDX-License-Identifier: MPL-2.0

//! TLB invalidation, local and cross-CPU.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::{
    arch,
    cpu::{iter_cpu_mask, this_cpu},
    mm::{frame::allocator, Paddr, Vaddr},
};

/// What to invalidate.
#[derive(Clone, Copy, Debug)]
pub enum FlushOp {
    /// One base page.
    Addr(Vaddr),
    /// Everything (a page-table-root rewrite, or a scoped PCID
    /// invalidation where available).
    All,
}

/// The number of shootdown IPIs sent since boot.
static NR_SHOOTDOWNS: AtomicU64 = AtomicU64::new(0);

pub fn nr_shootdowns() -> u64 {
    NR_SHOOTDOWNS.load(Relaxed)
}

/// Invalidates on the executing CPU only.
pub fn flush_local(op: FlushOp) {
    match op {
        FlushOp::Addr(vaddr) => arch::mm::tlb_flush_addr(vaddr),
        FlushOp::All => arch::mm::tlb_flush_all(),
    }
}

/// Invalidates on every CPU in `cpu_mask` (a snapshot of the address
/// space's activation set). The executing CPU flushes directly; the
/// others receive the shootdown IPI, whose handler performs a full local
/// flush. Synchronous from the caller's point of view.
pub fn shootdown(cpu_mask: u64, op: FlushOp) {
    let me = this_cpu();
    for cpu in iter_cpu_mask(cpu_mask) {
        if cpu == me {
            flush_local(op);
        } else {
            NR_SHOOTDOWNS.fetch_add(1, Relaxed);
            arch::irq::send_ipi(cpu, arch::IpiVector::TlbShootdown);
        }
    }
}

/// The shootdown IPI handler body.
pub fn handle_shootdown_ipi() {
    flush_local(FlushOp::All);
}

/// Batches the physical frames of a range-unmap so that one shootdown
/// covers all of them, and releases the frames only after the TLBs are
/// clean.
#[derive(Debug, Default)]
pub struct TlbGather {
    frames: Vec<Paddr>,
    any_unmapped: bool,
}

impl TlbGather {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            any_unmapped: false,
        }
    }

    /// Records that `vaddr` was unmapped; `frame` will be freed after the
    /// flush if the caller owned its reference.
    pub fn add(&mut self, frame: Option<Paddr>) {
        self.any_unmapped = true;
        if let Some(frame) = frame {
            self.frames.push(frame);
        }
    }

    /// Flushes the affected CPUs and releases the gathered frames.
    pub fn finish(self, cpu_mask: u64) {
        self.finish_with(cpu_mask, allocator::free_page);
    }

    /// Flushes the affected CPUs, then hands each gathered frame to
    /// `release`. For callers whose frames carry reference counts.
    pub fn finish_with(self, cpu_mask: u64, mut release: impl FnMut(Paddr)) {
        if !self.any_unmapped {
            return;
        }
        shootdown(cpu_mask, FlushOp::All);
        for frame in self.frames {
            release(frame);
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.any_unmapped
    }
}
