// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle Operations
//!
//! Handle management on behalf of a process, plus the syscalls built on it.
//!
//! # Syscalls Implemented
//!
//! - `rx_handle_close` - Close a single handle
//! - `rx_handle_duplicate` - Duplicate a handle with reduced rights
//! - `rx_object_get_koid` - Koid of the object behind a handle
//! - `rx_thread_self` / `rx_process_self` - Handles to the caller itself
//!
//! Handles are only ever added while the owning process is alive; the
//! handles of a process that dies are closed right after the thread lock
//! that saw it die is released.

use alloc::sync::Arc;

use crate::kernel::object::handle::{HandleEntry, HandleValue, Rights};
use crate::kernel::object::{Dispatcher, KernelObject};
use crate::kernel::process::{Process, ProcessState};
use crate::kernel::syscalls::Caller;
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::log_debug;

/// ============================================================================
/// Kernel Handle API
/// ============================================================================

impl Kernel {
    /// Give `owner` a handle to `object` with `rights`
    pub fn install_handle<T: Dispatcher>(&self, owner: &Process, object: Arc<T>, rights: Rights) -> Result<HandleValue> {
        let name = object.base().name();
        let entry = HandleEntry::new(object.clone().into_object(), rights, owner.koid(), name);

        // Checked under the table lock so a dying owner's cleanup sees the handle
        let mut handles = self.handles.lock();
        if owner.state() == ProcessState::Dead {
            return Err(Error::BadState);
        }
        handles.add(entry)
    }

    /// Resolve `value` to a `T`, requiring `rights`
    pub fn resolve_handle<T: Dispatcher>(&self, owner: &Process, value: HandleValue, rights: Rights) -> Result<Arc<T>> {
        self.handles.lock().get_object::<T>(value, owner.koid(), rights)
    }

    /// Resolve `value` to whatever object it names
    pub fn resolve_object(&self, owner: &Process, value: HandleValue) -> Result<(KernelObject, Rights)> {
        let handles = self.handles.lock();
        let entry = handles.get(value, owner.koid())?;
        Ok((entry.object().clone(), entry.rights()))
    }

    pub fn close_handle(&self, owner: &Process, value: HandleValue) -> Result {
        let entry = self.handles.lock().remove(value, owner.koid())?;
        log_debug!("handle {:?} closed ({} {})", value, entry.object().obj_type().name(), entry.object().koid());
        Ok(())
    }

    /// New handle to the same object; `rights` may be [`Rights::SAME_RIGHTS`]
    pub fn duplicate_handle(&self, owner: &Process, value: HandleValue, rights: u32) -> Result<HandleValue> {
        self.handles.lock().duplicate(value, owner.koid(), rights)
    }

    /// Live handles across all processes
    pub fn handle_count(&self) -> usize {
        self.handles.lock().count()
    }

    /// Handle to a new object for the caller, with the type's default rights
    pub(crate) fn new_object_handle<T: Dispatcher>(&self, owner: &Process, object: Arc<T>) -> Result<usize> {
        let rights = Rights::default_for_type(T::TYPE);
        let value = self.install_handle(owner, object, rights)?;
        Ok(value.into_raw() as usize)
    }
}

pub(crate) fn handle_arg(raw: usize) -> Result<HandleValue> {
    let raw = u32::try_from(raw).map_err(|_| Error::BadHandle)?;
    Ok(HandleValue::from_raw(raw))
}

/// ============================================================================
/// Syscalls
/// ============================================================================

impl Kernel {
    /// Closing the invalid handle is not an error
    pub(crate) fn sys_handle_close(&self, caller: &Caller, handle: usize) -> Result<usize> {
        let value = handle_arg(handle)?;
        if value == HandleValue::INVALID {
            return Ok(0);
        }
        self.close_handle(&caller.process, value)?;
        Ok(0)
    }

    pub(crate) fn sys_handle_duplicate(&self, caller: &Caller, handle: usize, rights: usize) -> Result<usize> {
        let rights = u32::try_from(rights).map_err(|_| Error::InvalidArgs)?;
        let value = self.duplicate_handle(&caller.process, handle_arg(handle)?, rights)?;
        Ok(value.into_raw() as usize)
    }

    pub(crate) fn sys_object_get_koid(&self, caller: &Caller, handle: usize) -> Result<usize> {
        let (object, _) = self.resolve_object(&caller.process, handle_arg(handle)?)?;
        Ok(object.koid() as usize)
    }

    pub(crate) fn sys_thread_self(&self, caller: &Caller) -> Result<usize> {
        self.new_object_handle(&caller.process, caller.thread.clone())
    }

    pub(crate) fn sys_process_self(&self, caller: &Caller) -> Result<usize> {
        self.new_object_handle(&caller.process, caller.process.clone())
    }
}
