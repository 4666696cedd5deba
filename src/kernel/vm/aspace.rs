// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Address Space Management
//!
//! An address space maps page-aligned virtual addresses to page frames.
//! Frames are reference counted, so the same frame can be mapped into
//! several address spaces at once and lives until its last mapping goes.
//!
//! # Design
//!
//! - The trait exposes single-lock primitives (collect, install, unmap,
//!   user copy); multi-space operations are composed from them by the caller
//! - Mappings are tracked in a sorted tree keyed by page number
//! - Every address space has a page budget; installing beyond it fails with
//!   `NoMemory`
//!
//! # Thread Safety
//!
//! Address spaces use interior mutability with a spin mutex per space and
//! one per frame's contents. A frame lock is only taken under its space's
//! lock, never the other way around.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::kernel::vm::{is_page_aligned, PageRights, Region, PAGE_SHIFT, PAGE_SIZE};
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{VAddr, Word};
use crate::log_debug;

/// Words per page frame
pub const PAGE_WORDS: usize = PAGE_SIZE / core::mem::size_of::<Word>();

/// ============================================================================
/// Page Frames
/// ============================================================================

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// One page of memory
pub struct PageFrame {
    id: u64,
    data: Mutex<[Word; PAGE_WORDS]>,
}

impl PageFrame {
    /// Allocate a zeroed frame
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            data: Mutex::new([0; PAGE_WORDS]),
        })
    }

    /// Identity of the frame, stable while it is mapped anywhere
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn read(&self, index: usize) -> Word {
        self.data.lock()[index]
    }

    pub fn write(&self, index: usize, value: Word) {
        self.data.lock()[index] = value;
    }
}

/// A frame together with the rights it is mapped with
#[derive(Clone)]
pub struct MappedPage {
    pub frame: Arc<PageFrame>,
    pub rights: PageRights,
}

/// ============================================================================
/// Address Space Interface
/// ============================================================================

/// What the task core needs from an address space
pub trait AddressSpace: Send + Sync {
    /// Frames behind every page of `region`, in address order
    ///
    /// Fails with `NotFound` if any page is unmapped.
    fn collect(&self, region: Region) -> Result<Vec<MappedPage>>;

    /// Map `pages` at consecutive pages from `base`, replacing any existing
    /// mappings there
    fn install(&self, base: VAddr, pages: &[MappedPage]) -> Result;

    /// Remove the mappings of `region`; unmapped pages are skipped
    fn unmap(&self, region: Region) -> Result;

    /// Read `out.len()` words starting at `addr`
    fn copy_from_user(&self, addr: VAddr, out: &mut [Word]) -> Result;

    /// Write `data` starting at `addr`
    fn copy_to_user(&self, addr: VAddr, data: &[Word]) -> Result;
}

/// ============================================================================
/// Software Address Space
/// ============================================================================

/// Address space kept entirely in kernel data structures
pub struct SoftAspace {
    max_pages: usize,
    mappings: Mutex<BTreeMap<usize, MappedPage>>,
}

impl SoftAspace {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            mappings: Mutex::new(BTreeMap::new()),
        }
    }

    /// Back `region` with fresh zeroed frames
    pub fn map_anonymous(&self, region: Region, rights: PageRights) -> Result {
        region.validate()?;
        let pages: Vec<MappedPage> = (0..region.pages())
            .map(|_| MappedPage {
                frame: PageFrame::new(),
                rights,
            })
            .collect();
        self.install(region.base, &pages)
    }

    /// Frame mapped at `addr`
    pub fn frame_of(&self, addr: VAddr) -> Option<Arc<PageFrame>> {
        self.mappings
            .lock()
            .get(&(addr >> PAGE_SHIFT))
            .map(|page| page.frame.clone())
    }

    pub fn rights_of(&self, addr: VAddr) -> Option<PageRights> {
        self.mappings.lock().get(&(addr >> PAGE_SHIFT)).map(|page| page.rights)
    }

    pub fn mapped_pages(&self) -> usize {
        self.mappings.lock().len()
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Check that every word of `[addr, addr + words * 8)` is mapped with
    /// `needed`, returning the pages in order
    fn user_pages(
        mappings: &BTreeMap<usize, MappedPage>,
        addr: VAddr,
        words: usize,
        needed: PageRights,
    ) -> Result<Vec<Arc<PageFrame>>> {
        if addr % core::mem::size_of::<Word>() != 0 {
            return Err(Error::InvalidArgs);
        }
        let len = words
            .checked_mul(core::mem::size_of::<Word>())
            .ok_or(Error::InvalidArgs)?;
        let end = addr.checked_add(len).ok_or(Error::InvalidArgs)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut frames = Vec::new();
        for page in (addr >> PAGE_SHIFT)..=((end - 1) >> PAGE_SHIFT) {
            let mapping = mappings.get(&page).ok_or(Error::InvalidArgs)?;
            if !mapping.rights.contains(needed) {
                return Err(Error::AccessDenied);
            }
            frames.push(mapping.frame.clone());
        }
        Ok(frames)
    }
}

/// Frame list index and word offset of the `i`th word from `addr`
fn word_slot(addr: VAddr, i: usize) -> (usize, usize) {
    let first_page = addr >> PAGE_SHIFT;
    let va = addr + i * core::mem::size_of::<Word>();
    ((va >> PAGE_SHIFT) - first_page, (va & (PAGE_SIZE - 1)) / core::mem::size_of::<Word>())
}

impl AddressSpace for SoftAspace {
    fn collect(&self, region: Region) -> Result<Vec<MappedPage>> {
        region.validate()?;
        let mappings = self.mappings.lock();
        let first = region.base >> PAGE_SHIFT;
        (first..first + region.pages())
            .map(|page| mappings.get(&page).cloned().ok_or(Error::NotFound))
            .collect()
    }

    fn install(&self, base: VAddr, pages: &[MappedPage]) -> Result {
        if !is_page_aligned(base) {
            return Err(Error::InvalidArgs);
        }
        let first = base >> PAGE_SHIFT;
        let mut mappings = self.mappings.lock();
        let added = (first..first + pages.len())
            .filter(|page| !mappings.contains_key(page))
            .count();
        if mappings.len() + added > self.max_pages {
            log_debug!(
                "aspace: {} more pages exceed the budget of {}",
                added,
                self.max_pages
            );
            return Err(Error::NoMemory);
        }
        for (i, page) in pages.iter().enumerate() {
            mappings.insert(first + i, page.clone());
        }
        Ok(())
    }

    fn unmap(&self, region: Region) -> Result {
        region.validate()?;
        let first = region.base >> PAGE_SHIFT;
        let mut mappings = self.mappings.lock();
        for page in first..first + region.pages() {
            mappings.remove(&page);
        }
        Ok(())
    }

    fn copy_from_user(&self, addr: VAddr, out: &mut [Word]) -> Result {
        let mappings = self.mappings.lock();
        let frames = Self::user_pages(&mappings, addr, out.len(), PageRights::READ)?;
        for (i, word) in out.iter_mut().enumerate() {
            let (frame, offset) = word_slot(addr, i);
            *word = frames[frame].read(offset);
        }
        Ok(())
    }

    fn copy_to_user(&self, addr: VAddr, data: &[Word]) -> Result {
        let mappings = self.mappings.lock();
        let frames = Self::user_pages(&mappings, addr, data.len(), PageRights::WRITE)?;
        for (i, word) in data.iter().enumerate() {
            let (frame, offset) = word_slot(addr, i);
            frames[frame].write(offset, *word);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: VAddr = 0x20_0000;

    #[test]
    fn test_copy_across_page_boundary() {
        let aspace = SoftAspace::new(8);
        aspace.map_anonymous(Region::new(BASE, 2 * PAGE_SIZE), PageRights::RW).unwrap();

        let addr = BASE + PAGE_SIZE - 16;
        aspace.copy_to_user(addr, &[1, 2, 3, 4]).unwrap();
        let mut out = [0; 4];
        aspace.copy_from_user(addr, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(aspace.frame_of(BASE + PAGE_SIZE).unwrap().read(1), 4);
    }

    #[test]
    fn test_copy_checks_mapping_and_rights() {
        let aspace = SoftAspace::new(8);
        aspace.map_anonymous(Region::new(BASE, PAGE_SIZE), PageRights::READ).unwrap();

        assert_eq!(aspace.copy_to_user(BASE, &[1]), Err(Error::AccessDenied));
        let mut out = [0; 2];
        assert_eq!(aspace.copy_from_user(BASE + PAGE_SIZE - 8, &mut out), Err(Error::InvalidArgs));
        assert_eq!(aspace.copy_from_user(BASE + 4, &mut out), Err(Error::InvalidArgs));
        assert!(aspace.copy_from_user(BASE, &mut [0u64; 0]).is_ok());
    }

    #[test]
    fn test_page_budget() {
        let aspace = SoftAspace::new(2);
        aspace.map_anonymous(Region::new(BASE, 2 * PAGE_SIZE), PageRights::RW).unwrap();
        assert_eq!(
            aspace.map_anonymous(Region::new(BASE + 2 * PAGE_SIZE, PAGE_SIZE), PageRights::RW),
            Err(Error::NoMemory)
        );
        // Replacing existing pages does not grow the space
        aspace.map_anonymous(Region::new(BASE, PAGE_SIZE), PageRights::READ).unwrap();
        assert_eq!(aspace.mapped_pages(), 2);
    }

    #[test]
    fn test_collect_requires_every_page() {
        let aspace = SoftAspace::new(8);
        aspace.map_anonymous(Region::new(BASE, PAGE_SIZE), PageRights::RW).unwrap();
        assert_eq!(aspace.collect(Region::new(BASE, PAGE_SIZE)).unwrap().len(), 1);
        assert_eq!(aspace.collect(Region::new(BASE, 2 * PAGE_SIZE)).err(), Some(Error::NotFound));
    }

    #[test]
    fn test_shared_frame_outlives_unmap() {
        let a = SoftAspace::new(8);
        let b = SoftAspace::new(8);
        a.map_anonymous(Region::new(BASE, PAGE_SIZE), PageRights::RW).unwrap();
        b.install(BASE, &a.collect(Region::new(BASE, PAGE_SIZE)).unwrap()).unwrap();

        a.copy_to_user(BASE, &[9]).unwrap();
        a.unmap(Region::new(BASE, PAGE_SIZE)).unwrap();
        let mut out = [0];
        b.copy_from_user(BASE, &mut out).unwrap();
        assert_eq!(out, [9]);
    }
}
