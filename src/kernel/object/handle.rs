// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle & Rights Model
//!
//! User space reaches kernel objects only through handles. A handle pairs a
//! reference to the object with a rights mask and the koid of the process
//! that owns it.
//!
//! # Design
//!
//! - **Rights**: Every operation names the rights it needs; a handle missing
//!   one fails with `AccessDenied`
//! - **Ownership**: A handle value presented by any process other than its
//!   owner is `BadHandle`
//! - **Reduction only**: Duplication can drop rights, never add them
//! - **Generations**: A value carries the slot's generation, so a closed
//!   handle's value stays invalid after the slot is reused
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::Rights;
//!
//! let rights = Rights::READ | Rights::WRITE;
//! assert!(rights.require(Rights::READ).is_ok());
//! assert!(rights.require(Rights::MANAGE).is_err());
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::kernel::object::{truncate_name, Dispatcher, KernelObject, ObjectType};
use crate::log_trace;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::Koid;

/// Maximum length of a handle name
pub const HANDLE_NAME_MAX: usize = 16;

/// Bits of a handle value holding the slot number
const HANDLE_SLOT_BITS: u32 = 20;

/// Largest handle table supported by the value encoding
pub const HANDLE_SLOT_MAX: usize = (1 << HANDLE_SLOT_BITS) - 1;

/// Generation bits kept in a handle value
const HANDLE_GENERATION_MASK: u32 = (1 << (32 - HANDLE_SLOT_BITS)) - 1;

/// ============================================================================
/// Handle Rights
/// ============================================================================

bitflags! {
    /// Handle rights bitmask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        /// Read state, receive from a thread
        const READ = 0x01;

        /// Modify state, send to a thread
        const WRITE = 0x02;

        /// Duplicate handle
        const DUPLICATE = 0x20;

        /// Transfer to process
        const TRANSFER = 0x40;

        /// Create children, kill, set policy
        const MANAGE = 0x80;
    }
}

impl Rights {
    /// Keep same rights on dup
    pub const SAME_RIGHTS: u32 = 0x8000_0000;

    /// Require specific rights
    pub fn require(self, required: Self) -> Result {
        if self.contains(required) {
            Ok(())
        } else {
            Err(Error::AccessDenied)
        }
    }

    /// Rights a freshly created object's handle carries
    pub fn default_for_type(obj_type: ObjectType) -> Self {
        match obj_type {
            ObjectType::Job | ObjectType::Process => {
                Self::READ | Self::WRITE | Self::DUPLICATE | Self::MANAGE
            }
            ObjectType::Thread => Self::all(),
        }
    }
}

/// ============================================================================
/// Handle Values
/// ============================================================================

/// Opaque handle value as seen by user space
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleValue(u32);

impl HandleValue {
    /// Never refers to a handle
    pub const INVALID: Self = Self(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }

    fn new(slot: usize, generation: u32) -> Self {
        let generation = generation & HANDLE_GENERATION_MASK;
        Self((generation << HANDLE_SLOT_BITS) | (slot as u32 + 1))
    }

    fn slot(self) -> Option<usize> {
        let raw = self.0 & HANDLE_SLOT_MAX as u32;
        (raw != 0).then(|| raw as usize - 1)
    }

    fn generation(self) -> u32 {
        self.0 >> HANDLE_SLOT_BITS
    }
}

impl fmt::Debug for HandleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleValue({:#x})", self.0)
    }
}

/// ============================================================================
/// Handle Entries
/// ============================================================================

/// One live handle
#[derive(Clone)]
pub struct HandleEntry {
    object: KernelObject,
    rights: Rights,
    owner: Koid,
    name: String,
}

impl HandleEntry {
    pub fn new(object: KernelObject, rights: Rights, owner: Koid, name: &str) -> Self {
        Self {
            object,
            rights,
            owner,
            name: truncate_name(name, HANDLE_NAME_MAX),
        }
    }

    pub fn object(&self) -> &KernelObject {
        &self.object
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    /// Koid of the owning process
    pub fn owner(&self) -> Koid {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The object as `T`, provided the handle grants `required`
    pub fn downcast<T: Dispatcher>(&self, required: Rights) -> Result<Arc<T>> {
        let object = T::downcast(&self.object).ok_or(Error::WrongType)?;
        self.rights.require(required)?;
        Ok(object)
    }
}

struct HandleSlot {
    generation: u32,
    entry: Option<HandleEntry>,
}

/// ============================================================================
/// Handle Table
/// ============================================================================

/// Table of every live handle in the system
pub struct HandleTable {
    slots: Vec<HandleSlot>,
    free: Vec<usize>,
    capacity: usize,
    count: usize,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity: capacity.min(HANDLE_SLOT_MAX),
            count: 0,
        }
    }

    /// Store `entry` and return its value
    pub fn add(&mut self, entry: HandleEntry) -> Result<HandleValue> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(HandleSlot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
            None => return Err(Error::NoResources),
        };
        let handle = &mut self.slots[slot];
        let value = HandleValue::new(slot, handle.generation);
        log_trace!(
            "handle {:?} -> {} {} rights {:?}",
            value,
            entry.object.obj_type().name(),
            entry.object.koid(),
            entry.rights
        );
        handle.entry = Some(entry);
        self.count += 1;
        Ok(value)
    }

    fn slot_of(&self, value: HandleValue) -> Result<usize> {
        let slot = value.slot().ok_or(Error::BadHandle)?;
        match self.slots.get(slot) {
            Some(handle)
                if handle.entry.is_some()
                    && handle.generation & HANDLE_GENERATION_MASK == value.generation() =>
            {
                Ok(slot)
            }
            _ => Err(Error::BadHandle),
        }
    }

    /// Look up `value` on behalf of process `owner`
    pub fn get(&self, value: HandleValue, owner: Koid) -> Result<&HandleEntry> {
        let slot = self.slot_of(value)?;
        match &self.slots[slot].entry {
            Some(entry) if entry.owner == owner => Ok(entry),
            _ => Err(Error::BadHandle),
        }
    }

    /// Resolve `value` to an object of type `T` carrying `required`
    pub fn get_object<T: Dispatcher>(&self, value: HandleValue, owner: Koid, required: Rights) -> Result<Arc<T>> {
        self.get(value, owner)?.downcast::<T>(required)
    }

    /// Close `value`, returning the entry
    ///
    /// Dropping the entry releases the table's reference to the object.
    pub fn remove(&mut self, value: HandleValue, owner: Koid) -> Result<HandleEntry> {
        self.get(value, owner)?;
        let slot = self.slot_of(value)?;
        let handle = &mut self.slots[slot];
        let entry = handle.entry.take().ok_or(Error::BadHandle)?;
        handle.generation = handle.generation.wrapping_add(1);
        self.free.push(slot);
        self.count -= 1;
        Ok(entry)
    }

    /// New handle to the same object with `rights` reduced
    ///
    /// `rights` may be [`Rights::SAME_RIGHTS`]. Asking for a right the
    /// source lacks is `InvalidArgs`.
    pub fn duplicate(&mut self, value: HandleValue, owner: Koid, rights: u32) -> Result<HandleValue> {
        let source = self.get(value, owner)?;
        source.rights.require(Rights::DUPLICATE)?;

        let rights = if rights == Rights::SAME_RIGHTS {
            source.rights
        } else {
            let requested = Rights::from_bits(rights).ok_or(Error::InvalidArgs)?;
            if !source.rights.contains(requested) {
                return Err(Error::InvalidArgs);
            }
            requested
        };
        let entry = HandleEntry {
            rights,
            ..source.clone()
        };
        self.add(entry)
    }

    /// Close every handle owned by process `owner`
    pub fn remove_owned_by(&mut self, owner: Koid) -> usize {
        let mut closed = 0;
        for (slot, handle) in self.slots.iter_mut().enumerate() {
            if handle.entry.as_ref().is_some_and(|entry| entry.owner == owner) {
                handle.entry = None;
                handle.generation = handle.generation.wrapping_add(1);
                self.free.push(slot);
                closed += 1;
            }
        }
        self.count -= closed;
        closed
    }

    /// Number of live handles
    pub fn count(&self) -> usize {
        self.count
    }
}
