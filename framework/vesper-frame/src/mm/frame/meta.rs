// SPDX-License-Identifier: MPL-2.0

//! Metadata of physical page frames.
//!
//! Picture a static array with one slot per page frame. A slot records
//! what the frame currently is (reserved, free in the buddy system,
//! allocated), the buddy order when the frame heads a free block, the
//! free-list linkage, the share count used by copy-on-write, and a small
//! sub-header used only when the frame backs a page-table node (its child
//! count and a one-byte spin lock, the split page-table lock).
//!
//! Every field is atomic; fields belonging to the buddy system are only
//! written under the buddy lock, the page-table sub-header only under the
//! frame's own split PTL.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};

use spin::Once;

use super::Pfn;
use crate::trap::{disable_local, DisabledLocalIrqGuard};

/// What a frame currently is. A frame is in exactly one state at any time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum FrameState {
    /// Not backed by usable RAM, or not yet seeded.
    Unused = 0,
    /// Reserved at boot; the kernel must not allocate it.
    Reserved = 1,
    /// Heads a free block of `order()` pages in the buddy system.
    FreeHead = 2,
    /// Belongs to a free block headed by another frame.
    FreeTail = 3,
    /// Belongs to an allocated block.
    Allocated = 4,
}

/// No-link sentinel of the embedded free lists.
pub(super) const NIL: u32 = u32::MAX;

/// One descriptor-table slot.
#[repr(C)]
pub struct MetaSlot {
    state: AtomicU8,
    /// The buddy order; meaningful only in the `FreeHead` state and, for
    /// bookkeeping, on the head of an allocated block.
    order: AtomicU8,
    /// The split page-table lock byte; bit 0 is the lock.
    pt_lock: AtomicU8,
    /// Miscellaneous marker bits; see [`Self::set_object_owned`].
    marks: AtomicU8,
    /// The number of present children when the frame backs a page-table
    /// node. Written under the split PTL.
    pt_children: AtomicU16,
    _pad2: AtomicU16,
    /// How many address-space mappings currently reference the frame.
    /// Drives the copy-on-write policy.
    share_count: AtomicU32,
    /// Free-list linkage (PFNs; `NIL` terminated), owned by the buddy lock.
    link_prev: AtomicU32,
    link_next: AtomicU32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<MetaSlot>(), 20);

impl MetaSlot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(FrameState::Unused as u8),
            order: AtomicU8::new(0),
            pt_lock: AtomicU8::new(0),
            marks: AtomicU8::new(0),
            pt_children: AtomicU16::new(0),
            _pad2: AtomicU16::new(0),
            share_count: AtomicU32::new(0),
            link_prev: AtomicU32::new(NIL),
            link_next: AtomicU32::new(NIL),
        }
    }

    pub fn state(&self) -> FrameState {
        match self.state.load(Ordering::Relaxed) {
            1 => FrameState::Reserved,
            2 => FrameState::FreeHead,
            3 => FrameState::FreeTail,
            4 => FrameState::Allocated,
            _ => FrameState::Unused,
        }
    }

    pub(super) fn set_state(&self, state: FrameState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn order(&self) -> usize {
        self.order.load(Ordering::Relaxed) as usize
    }

    pub(super) fn set_order(&self, order: usize) {
        self.order.store(order as u8, Ordering::Relaxed);
    }

    pub(super) fn link_prev(&self) -> u32 {
        self.link_prev.load(Ordering::Relaxed)
    }

    pub(super) fn link_next(&self) -> u32 {
        self.link_next.load(Ordering::Relaxed)
    }

    pub(super) fn set_links(&self, prev: u32, next: u32) {
        self.link_prev.store(prev, Ordering::Relaxed);
        self.link_next.store(next, Ordering::Relaxed);
    }

    pub(super) fn set_link_prev(&self, prev: u32) {
        self.link_prev.store(prev, Ordering::Relaxed);
    }

    pub(super) fn set_link_next(&self, next: u32) {
        self.link_next.store(next, Ordering::Relaxed);
    }

    /// The number of address-space mappings of the frame.
    pub fn share_count(&self) -> u32 {
        self.share_count.load(Ordering::Acquire)
    }

    pub fn inc_share(&self) {
        self.share_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the share count, returning the previous value.
    pub fn dec_share(&self) -> u32 {
        self.share_count.fetch_sub(1, Ordering::AcqRel)
    }

    pub fn set_share(&self, count: u32) {
        self.share_count.store(count, Ordering::Release);
    }

    /// Whether a page object currently owns the frame. A frame stays
    /// alive while it is object-owned or has mappings; whoever drops the
    /// last claim frees it.
    pub fn is_object_owned(&self) -> bool {
        self.marks.load(Ordering::Acquire) & 1 != 0
    }

    pub fn set_object_owned(&self, owned: bool) {
        if owned {
            self.marks.fetch_or(1, Ordering::AcqRel);
        } else {
            self.marks.fetch_and(!1, Ordering::AcqRel);
        }
    }

    /// The number of present entries of the page-table node this frame
    /// backs. Read and written under the split PTL.
    pub fn pt_children(&self) -> u16 {
        self.pt_children.load(Ordering::Relaxed)
    }

    pub fn inc_pt_children(&self) {
        self.pt_children.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_pt_children(&self) {
        self.pt_children.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_pt_children(&self, count: u16) {
        self.pt_children.store(count, Ordering::Relaxed);
    }

    /// Takes the frame's split page-table lock with local IRQs disabled.
    pub fn lock_pt(&self) -> PtLockGuard<'_> {
        let irq_guard = disable_local();
        while self
            .pt_lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        PtLockGuard {
            slot: self,
            _irq_guard: irq_guard,
        }
    }
}

/// The guard of a frame's split page-table lock.
#[must_use]
pub struct PtLockGuard<'a> {
    slot: &'a MetaSlot,
    _irq_guard: DisabledLocalIrqGuard,
}

impl Drop for PtLockGuard<'_> {
    fn drop(&mut self) {
        self.slot.pt_lock.store(0, Ordering::Release);
    }
}

static FRAME_TABLE: Once<Vec<MetaSlot>> = Once::new();

pub(crate) fn init(nr_frames: usize) {
    FRAME_TABLE.call_once(|| {
        let mut table = Vec::with_capacity(nr_frames);
        for _ in 0..nr_frames {
            table.push(MetaSlot::new());
        }
        table
    });
}

/// The descriptor of the given frame.
///
/// # Panics
///
/// Panics if the PFN is beyond the end of physical memory.
pub fn slot(pfn: Pfn) -> &'static MetaSlot {
    &FRAME_TABLE.get().expect("frame table is not initialized")[pfn]
}

/// The descriptor of the given frame, or `None` if out of range.
pub fn try_slot(pfn: Pfn) -> Option<&'static MetaSlot> {
    FRAME_TABLE.get()?.get(pfn)
}

/// The number of frames the descriptor table covers.
pub fn nr_frames() -> usize {
    FRAME_TABLE.get().map_or(0, |t| t.len())
}
