// SPDX-License-Identifier: MPL-2.0

//! Page-backed objects.
//!
//! A `Vmo` maps page offsets to physical frames and unifies anonymous,
//! file-backed, and device memory behind one interface. Several VMAs in
//! several address spaces may map overlapping ranges of one object; the
//! object keeps a reverse-mapping list of them so that all translations
//! of a page can be torn down together.
//!
//! Frame lifetime is a joint claim: the owning object marks its frames,
//! and every installed translation holds one share. A frame is released
//! by whichever side drops the last claim.

use alloc::sync::Weak;

use vesper_frame::mm::{
    frame::{allocator, meta, paddr_to_pfn},
    space::VmSpace,
};

use crate::prelude::*;

/// Supplies pages for file-backed objects; implemented by the page cache
/// of the filesystem layer.
pub trait Pager: Send + Sync {
    /// Produces the frame backing `page_idx`, reading it in if needed.
    fn commit_page(&self, page_idx: usize) -> Result<Paddr>;

    /// Notifies the pager that a committed page was dropped.
    fn decommit_page(&self, page_idx: usize) -> Result<()>;
}

/// What backs a `Vmo`.
pub enum VmoBacking {
    /// Zero-filled on first touch.
    Anon,
    /// Populated through a pager.
    File { pager: Arc<dyn Pager> },
    /// A fixed physical window; frames are not owned by the object.
    Device { base: Paddr },
}

/// One VMA's claim on an object, kept for reverse mapping.
struct Mapper {
    space: Weak<VmSpace>,
    /// The virtual address mapping page `pgoff`.
    base: Vaddr,
    pgoff: usize,
    nr_pages: usize,
}

/// A page-backed object.
pub struct Vmo {
    backing: VmoBacking,
    /// Sparse page-offset → frame map.
    pages: SpinLock<BTreeMap<usize, Paddr>>,
    /// The VMAs that may map pages of this object.
    mappers: SpinLock<Vec<Mapper>>,
}

impl Vmo {
    /// Creates an empty anonymous object.
    pub fn anon_create() -> Arc<Self> {
        Arc::new(Self {
            backing: VmoBacking::Anon,
            pages: SpinLock::new(BTreeMap::new()),
            mappers: SpinLock::new(Vec::new()),
        })
    }

    /// Creates a file-backed object populated through `pager`.
    pub fn file_create(pager: Arc<dyn Pager>) -> Arc<Self> {
        Arc::new(Self {
            backing: VmoBacking::File { pager },
            pages: SpinLock::new(BTreeMap::new()),
            mappers: SpinLock::new(Vec::new()),
        })
    }

    /// Creates an object windowing fixed device memory at `base`.
    pub fn device_create(base: Paddr) -> Arc<Self> {
        Arc::new(Self {
            backing: VmoBacking::Device { base },
            pages: SpinLock::new(BTreeMap::new()),
            mappers: SpinLock::new(Vec::new()),
        })
    }

    pub fn is_anon(&self) -> bool {
        matches!(self.backing, VmoBacking::Anon)
    }

    pub fn is_device(&self) -> bool {
        matches!(self.backing, VmoBacking::Device { .. })
    }

    /// The frame at `page_idx`, if committed.
    pub fn find_page(&self, page_idx: usize) -> Option<Paddr> {
        if let VmoBacking::Device { base } = self.backing {
            return Some(base + page_idx * PAGE_SIZE);
        }
        self.pages.lock().get(&page_idx).copied()
    }

    /// Inserts a frame at `page_idx`, taking object ownership of it. A
    /// previously committed frame at the same offset is released.
    pub fn add_page(&self, page_idx: usize, paddr: Paddr) {
        debug_assert!(!matches!(self.backing, VmoBacking::Device { .. }));
        meta::slot(paddr_to_pfn(paddr)).set_object_owned(true);
        if let Some(old) = self.pages.lock().insert(page_idx, paddr) {
            release_object_claim(old);
        }
    }

    /// The frame at `page_idx`, committing it on demand.
    pub fn commit_page(&self, page_idx: usize) -> Result<Paddr> {
        if let Some(paddr) = self.find_page(page_idx) {
            return Ok(paddr);
        }
        let paddr = match &self.backing {
            VmoBacking::Anon => allocator::alloc_page()
                .ok_or_else(|| Error::with_message(Errno::ENOMEM, "cannot commit a page"))?,
            VmoBacking::File { pager } => pager.commit_page(page_idx)?,
            VmoBacking::Device { .. } => unreachable!(),
        };
        self.add_page(page_idx, paddr);
        Ok(paddr)
    }

    /// Drops the committed page at `page_idx`, if any.
    pub fn decommit_page(&self, page_idx: usize) -> Result<()> {
        let removed = self.pages.lock().remove(&page_idx);
        if let Some(paddr) = removed {
            if let VmoBacking::File { pager } = &self.backing {
                pager.decommit_page(page_idx)?;
            }
            release_object_claim(paddr);
        }
        Ok(())
    }

    /// Registers a mapping VMA for reverse lookup.
    pub fn register_mapper(
        &self,
        space: &Arc<VmSpace>,
        base: Vaddr,
        pgoff: usize,
        nr_pages: usize,
    ) {
        self.mappers.lock().push(Mapper {
            space: Arc::downgrade(space),
            base,
            pgoff,
            nr_pages,
        });
    }

    /// Drops the reverse-mapping record added by [`register_mapper`].
    ///
    /// [`register_mapper`]: Self::register_mapper
    pub fn unregister_mapper(&self, space: &Arc<VmSpace>, base: Vaddr) {
        self.mappers.lock().retain(|m| {
            !(m.base == base && m.space.upgrade().is_some_and(|s| Arc::ptr_eq(&s, space)))
        });
    }

    /// Tears down every translation of `page_idx` across all mapping
    /// address spaces. The frame itself stays committed in the object.
    pub fn unmap_all_mappers(&self, page_idx: usize) {
        let targets: Vec<(Arc<VmSpace>, Vaddr)> = {
            let mappers = self.mappers.lock();
            mappers
                .iter()
                .filter(|m| m.pgoff <= page_idx && page_idx < m.pgoff + m.nr_pages)
                .filter_map(|m| {
                    let space = m.space.upgrade()?;
                    let vaddr = m.base + (page_idx - m.pgoff) * PAGE_SIZE;
                    Some((space, vaddr))
                })
                .collect()
        };
        for (space, vaddr) in targets {
            if let Some(paddr) = space.unmap(vaddr) {
                release_mapping_claim(paddr);
            }
        }
    }

    /// The number of committed pages; diagnostics only.
    pub fn nr_committed(&self) -> usize {
        self.pages.lock().len()
    }
}

impl Drop for Vmo {
    fn drop(&mut self) {
        if matches!(self.backing, VmoBacking::Device { .. }) {
            return;
        }
        let pages = core::mem::take(&mut *self.pages.lock());
        for (_, paddr) in pages {
            release_object_claim(paddr);
        }
    }
}

/// Releases the object's claim on a frame, freeing it when no mapping
/// shares remain.
fn release_object_claim(paddr: Paddr) {
    let slot = meta::slot(paddr_to_pfn(paddr));
    slot.set_object_owned(false);
    if slot.share_count() == 0 {
        allocator::free_page(paddr);
    }
}

/// Releases one translation's claim on a frame, freeing it when it was
/// the last and no object owns the frame. Addresses outside RAM (device
/// windows) carry no claims.
pub(crate) fn release_mapping_claim(paddr: Paddr) {
    let Some(slot) = meta::try_slot(paddr_to_pfn(paddr)) else {
        return;
    };
    if slot.dec_share() == 1 && !slot.is_object_owned() {
        allocator::free_page(paddr);
    }
}

/// Records one more translation of the frame.
pub(crate) fn take_mapping_claim(paddr: Paddr) {
    if let Some(slot) = meta::try_slot(paddr_to_pfn(paddr)) {
        slot.inc_share();
    }
}

#[cfg(test)]
mod test {
    use vesper_frame::mm::sim;

    use super::*;

    #[test]
    fn anon_commit_is_zero_filled_and_sticky() {
        sim::init();
        let vmo = Vmo::anon_create();
        assert!(vmo.find_page(3).is_none());
        let paddr = vmo.commit_page(3).unwrap();
        assert_eq!(vmo.find_page(3), Some(paddr));
        // Committing again returns the same frame.
        assert_eq!(vmo.commit_page(3).unwrap(), paddr);
        let byte = unsafe { *(vesper_frame::mm::paddr_to_vaddr(paddr) as *const u8) };
        assert_eq!(byte, 0);
    }

    #[test]
    fn frames_survive_until_last_claim_drops() {
        sim::init();
        let vmo = Vmo::anon_create();
        let paddr = vmo.commit_page(0).unwrap();
        let slot = meta::slot(paddr_to_pfn(paddr));

        // A translation takes a share; dropping the object then leaves
        // the frame alive until the translation goes too.
        take_mapping_claim(paddr);
        assert_eq!(slot.share_count(), 1);
        drop(vmo);
        assert!(!slot.is_object_owned());
        assert_eq!(
            slot.state(),
            vesper_frame::mm::frame::meta::FrameState::Allocated
        );
        release_mapping_claim(paddr);
        // The last claim is gone; the frame went back to the allocator.
        assert_eq!(slot.share_count(), 0);
        assert!(!slot.is_object_owned());
    }
}
