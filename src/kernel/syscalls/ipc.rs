// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! IPC System Calls
//!
//! # Syscalls Implemented
//!
//! - `rx_ipc_send` / `rx_ipc_receive` / `rx_ipc_call` - Rendezvous with a
//!   peer thread named by handle, bounded by an absolute tick deadline
//!   (`u64::MAX` waits forever)
//! - `rx_ipc_load_message` / `rx_ipc_store_message` - Move message words
//!   between user memory and the caller's registers
//! - `rx_ipc_accept`, `rx_ipc_set_br`, `rx_ipc_get_mr`, `rx_ipc_set_mr` -
//!   Direct register access
//!
//! Sending needs `WRITE` on the peer's handle, receiving needs `READ`.

use alloc::sync::Arc;

use crate::kernel::ipc::{Acceptor, MessageTag};
use crate::kernel::object::handle::Rights;
use crate::kernel::sched::Syscall;
use crate::kernel::syscalls::handle_ops::handle_arg;
use crate::kernel::syscalls::Caller;
use crate::kernel::thread::Thread;
use crate::kernel::timer::Deadline;
use crate::kernel::usercopy::UserPtr;
use crate::kernel::Kernel;
use crate::rustux::errors::Result;
use crate::rustux::types::Word;

impl Kernel {
    fn ipc_peer(&self, caller: &Caller, handle: usize, rights: Rights) -> Result<Arc<Thread>> {
        self.resolve_handle::<Thread>(&caller.process, handle_arg(handle)?, rights)
    }

    pub(crate) fn sys_ipc_send(&self, caller: &Caller, to: usize, deadline: usize) -> Syscall<usize> {
        match self.ipc_peer(caller, to, Rights::WRITE) {
            Ok(to) => self
                .ipc_send(caller.cpu, &to, Deadline::from_raw(deadline as u64))
                .map(|()| 0),
            Err(err) => Syscall::Complete(Err(err)),
        }
    }

    pub(crate) fn sys_ipc_receive(&self, caller: &Caller, from: usize, deadline: usize) -> Syscall<usize> {
        match self.ipc_peer(caller, from, Rights::READ) {
            Ok(from) => self
                .ipc_receive(caller.cpu, &from, Deadline::from_raw(deadline as u64))
                .map(|()| 0),
            Err(err) => Syscall::Complete(Err(err)),
        }
    }

    pub(crate) fn sys_ipc_call(&self, caller: &Caller, to: usize, deadline: usize) -> Syscall<usize> {
        match self.ipc_peer(caller, to, Rights::READ | Rights::WRITE) {
            Ok(to) => self
                .ipc_call(caller.cpu, &to, Deadline::from_raw(deadline as u64))
                .map(|()| 0),
            Err(err) => Syscall::Complete(Err(err)),
        }
    }

    pub(crate) fn sys_ipc_load_message(&self, caller: &Caller, tag: usize, words: usize) -> Result<usize> {
        let tag = MessageTag::from_raw(tag as Word);
        tag.validate()?;
        let src = UserPtr::new(words, tag.words())?;
        self.ipc_load_message(&caller.thread, tag, src)?;
        Ok(0)
    }

    /// Returns the raw tag of the stored message
    pub(crate) fn sys_ipc_store_message(&self, caller: &Caller, words: usize, capacity: usize) -> Result<usize> {
        let dst = UserPtr::new(words, capacity)?;
        let tag = self.ipc_store_message(&caller.thread, dst)?;
        Ok(tag.raw() as usize)
    }

    pub(crate) fn sys_ipc_accept(&self, caller: &Caller, acceptor: usize) -> Result<usize> {
        self.ipc_accept(&caller.thread, Acceptor::from_raw(acceptor as Word));
        Ok(0)
    }

    pub(crate) fn sys_ipc_set_br(&self, caller: &Caller, index: usize, value: usize) -> Result<usize> {
        self.ipc_set_br(&caller.thread, index, value as Word)?;
        Ok(0)
    }

    pub(crate) fn sys_ipc_get_mr(&self, caller: &Caller, index: usize) -> Result<usize> {
        Ok(self.ipc_get_mr(&caller.thread, index)? as usize)
    }

    pub(crate) fn sys_ipc_set_mr(&self, caller: &Caller, index: usize, value: usize) -> Result<usize> {
        self.ipc_set_mr(&caller.thread, index, value as Word)?;
        Ok(0)
    }
}
