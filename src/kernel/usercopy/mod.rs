// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! User/Kernel Boundary Safety
//!
//! Message words cross the user boundary through a [`UserPtr`]. The pointer
//! is validated when it is built; the copy itself goes through the owning
//! process's address space, which rejects unmapped or read-only pages.
//!
//! # Design
//!
//! - **Validation first**: Null, misaligned, overflowing or non-user ranges
//!   are refused before any address space is touched
//! - **Word granular**: Only whole message words are ever copied

use crate::kernel::vm::{AddressSpace, USER_ASPACE_BASE, USER_ASPACE_TOP};
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{VAddr, Word};
use crate::log_debug;

const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// ============================================================================
/// User Pointer
/// ============================================================================

/// Validated user range of `len` words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPtr {
    addr: VAddr,
    len: usize,
}

impl UserPtr {
    /// Validate `len` words at `addr`
    pub fn new(addr: VAddr, len: usize) -> Result<Self> {
        if addr == 0 || addr % WORD_SIZE != 0 {
            log_debug!("usercopy: bad user pointer {:#x}", addr);
            return Err(Error::InvalidArgs);
        }
        let end = len
            .checked_mul(WORD_SIZE)
            .and_then(|bytes| addr.checked_add(bytes))
            .ok_or(Error::InvalidArgs)?;
        if addr < USER_ASPACE_BASE || end > USER_ASPACE_TOP {
            log_debug!("usercopy: range {:#x}-{:#x} outside user space", addr, end);
            return Err(Error::InvalidArgs);
        }
        Ok(Self { addr, len })
    }

    pub const fn addr(&self) -> VAddr {
        self.addr
    }

    /// Length in words
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the user words into `out`, which must be exactly as long
    pub fn copy_in(&self, aspace: &dyn AddressSpace, out: &mut [Word]) -> Result {
        if out.len() != self.len {
            return Err(Error::InvalidArgs);
        }
        aspace.copy_from_user(self.addr, out)
    }

    /// Copy `data` out to the user range, which must be exactly as long
    pub fn copy_out(&self, aspace: &dyn AddressSpace, data: &[Word]) -> Result {
        if data.len() != self.len {
            return Err(Error::InvalidArgs);
        }
        aspace.copy_to_user(self.addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::vm::{PageRights, Region, SoftAspace, PAGE_SIZE};

    #[test]
    fn test_pointer_validation() {
        assert_eq!(UserPtr::new(0, 1).err(), Some(Error::InvalidArgs));
        assert_eq!(UserPtr::new(0x1_0004, 1).err(), Some(Error::InvalidArgs));
        assert_eq!(UserPtr::new(0x8000, 1).err(), Some(Error::InvalidArgs));
        assert_eq!(UserPtr::new(USER_ASPACE_TOP - 8, 2).err(), Some(Error::InvalidArgs));
        assert_eq!(UserPtr::new(0x1_0000, usize::MAX).err(), Some(Error::InvalidArgs));

        let ptr = UserPtr::new(0x1_0000, 4).unwrap();
        assert_eq!(ptr.addr(), 0x1_0000);
        assert_eq!(ptr.len(), 4);
    }

    #[test]
    fn test_copy_round_trip() {
        let aspace = SoftAspace::new(4);
        aspace.map_anonymous(Region::new(0x1_0000, PAGE_SIZE), PageRights::RW).unwrap();

        let ptr = UserPtr::new(0x1_0000, 3).unwrap();
        ptr.copy_out(&aspace, &[7, 8, 9]).unwrap();
        let mut out = [0; 3];
        ptr.copy_in(&aspace, &mut out).unwrap();
        assert_eq!(out, [7, 8, 9]);

        assert_eq!(ptr.copy_in(&aspace, &mut [0u64; 2]), Err(Error::InvalidArgs));
    }

    #[test]
    fn test_copy_from_unmapped_fails() {
        let aspace = SoftAspace::new(4);
        let ptr = UserPtr::new(0x2_0000, 1).unwrap();
        assert_eq!(ptr.copy_in(&aspace, &mut [0u64]), Err(Error::InvalidArgs));
    }
}
