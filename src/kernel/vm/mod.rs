// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Virtual Memory Collaborator
//!
//! The task core does not manage page tables. It reaches an address space
//! only through the [`AddressSpace`] trait: to move regions between
//! processes during IPC and to copy message words across the user boundary.
//!
//! # Organization
//!
//! - [`aspace`] - The [`AddressSpace`] trait and [`SoftAspace`], a software
//!   address space backed by shared page frames
//!
//! # Region Transfer
//!
//! [`transfer_region`] shares (MAP) or moves (GRANT) the frames behind a
//! region of one address space into another. Page contents are never
//! copied; both sides end up referring to the same frames.

use bitflags::bitflags;

use crate::rustux::errors::{Error, Result};
use crate::rustux::types::VAddr;
use crate::log_trace;

pub mod aspace;

pub use aspace::{AddressSpace, MappedPage, PageFrame, SoftAspace};

/// ============================================================================
/// Layout
/// ============================================================================

/// Page size shift (4KB pages)
pub const PAGE_SHIFT: usize = 12;

/// Page size
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Lowest user address; the first pages stay unmapped to catch null pointers
pub const USER_ASPACE_BASE: VAddr = 0x1_0000;

/// End of the user address range (exclusive)
pub const USER_ASPACE_TOP: VAddr = 1 << 48;

pub const fn page_align_down(addr: VAddr) -> VAddr {
    addr & !(PAGE_SIZE - 1)
}

pub const fn is_page_aligned(addr: VAddr) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

bitflags! {
    /// Access rights of a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageRights: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const RW = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Page-aligned range of virtual addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: VAddr,
    pub size: usize,
}

impl Region {
    pub const fn new(base: VAddr, size: usize) -> Self {
        Self { base, size }
    }

    pub const fn end(&self) -> VAddr {
        self.base + self.size
    }

    pub const fn pages(&self) -> usize {
        self.size >> PAGE_SHIFT
    }

    pub const fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// Page aligned, non-empty and inside the user range
    pub fn validate(&self) -> Result {
        let end = self.base.checked_add(self.size).ok_or(Error::InvalidArgs)?;
        if self.size == 0 || !is_page_aligned(self.base) || !is_page_aligned(self.size) || end > USER_ASPACE_TOP {
            return Err(Error::InvalidArgs);
        }
        Ok(())
    }
}

/// How a region changes hands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Both sides keep access
    Map,

    /// The source loses access
    Grant,
}

/// Make the frames behind `send` in `src` visible at `receive` in `dst`
///
/// Rights on the destination are the source mapping's rights limited to
/// `rights`. A grant then unmaps `send` from `src`. Each address space lock
/// is taken on its own, never nested, so `src` and `dst` may be the same
/// address space as long as a grant does not overlap itself.
pub fn transfer_region(
    src: &dyn AddressSpace,
    dst: &dyn AddressSpace,
    send: Region,
    receive: Region,
    rights: PageRights,
    mode: TransferMode,
) -> Result {
    send.validate()?;
    receive.validate()?;
    if send.size != receive.size {
        return Err(Error::InvalidArgs);
    }
    let same = core::ptr::eq(src as *const dyn AddressSpace as *const (), dst as *const dyn AddressSpace as *const ());
    if same && mode == TransferMode::Grant && send.overlaps(&receive) {
        return Err(Error::InvalidArgs);
    }

    let mut pages = src.collect(send)?;
    for page in pages.iter_mut() {
        page.rights &= rights;
    }
    dst.install(receive.base, &pages)?;
    if mode == TransferMode::Grant {
        src.unmap(send)?;
    }
    log_trace!(
        "vm: {:?} {:#x}+{:#x} -> {:#x}",
        mode,
        send.base,
        send.size,
        receive.base
    );
    Ok(())
}
