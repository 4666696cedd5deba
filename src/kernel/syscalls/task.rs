// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Task System Calls
//!
//! # Syscalls Implemented
//!
//! - `rx_job_create` - Create a job
//! - `rx_job_set_policy` - Narrow a job's policy
//! - `rx_process_create` - Create a process
//! - `rx_process_exit` - Exit current process
//! - `rx_thread_create` - Create a thread
//! - `rx_thread_start` - Start a thread
//! - `rx_thread_exit` - Exit current thread
//! - `rx_thread_yield` - Give up the CPU
//! - `rx_task_kill` - Kill a job, process or thread
//!
//! # Design
//!
//! - Creation needs `MANAGE` on the parent and is checked against the
//!   parent job's policy on behalf of the calling process
//! - Names arrive as a user pointer and byte length, read word by word
//! - The new object's handle is the return value

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::kernel::object::handle::Rights;
use crate::kernel::object::job::{Job, PolicyAction, PolicyCondition, PolicyItem, PolicyMode, JOB_NAME_MAX};
use crate::kernel::object::KernelObject;
use crate::kernel::process::Process;
use crate::kernel::syscalls::handle_ops::handle_arg;
use crate::kernel::syscalls::Caller;
use crate::kernel::thread::Thread;
use crate::kernel::usercopy::UserPtr;
use crate::kernel::vm::{AddressSpace, SoftAspace};
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{CpuId, VAddr, Word};
use crate::log_debug;

/// Longest name accepted from user space, in bytes
pub const NAME_MAX_INPUT: usize = JOB_NAME_MAX;

/// Most policy items in one `rx_job_set_policy` call
pub const POLICY_ITEMS_MAX: usize = 16;

const WORD_BYTES: usize = core::mem::size_of::<Word>();

/// Read a UTF-8 name of `len` bytes at `addr`
///
/// An empty name needs no pointer.
fn read_name(aspace: &dyn AddressSpace, addr: VAddr, len: usize) -> Result<String> {
    if len == 0 {
        return Ok(String::new());
    }
    if len > NAME_MAX_INPUT {
        return Err(Error::InvalidArgs);
    }
    let ptr = UserPtr::new(addr, len.div_ceil(WORD_BYTES))?;
    let mut words = vec![0; ptr.len()];
    ptr.copy_in(aspace, &mut words)?;

    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).take(len).collect();
    String::from_utf8(bytes).map_err(|_| Error::InvalidArgs)
}

/// Decode one policy item word: condition in the low half, action in the high
fn policy_item(word: Word) -> Result<PolicyItem> {
    let condition = PolicyCondition::from_raw(word as u32).ok_or(Error::InvalidArgs)?;
    let action = PolicyAction::from_raw((word >> 32) as u32).ok_or(Error::InvalidArgs)?;
    Ok(PolicyItem::new(condition, action))
}

impl Kernel {
    pub(crate) fn sys_job_create(&self, caller: &Caller, parent: usize, name: usize, name_len: usize) -> Result<usize> {
        let parent = self.resolve_handle::<Job>(&caller.process, handle_arg(parent)?, Rights::MANAGE)?;
        let name = read_name(caller.process.aspace().as_ref(), name, name_len)?;
        let job = self.create_job_as(&parent, &name, Some(caller))?;
        self.new_object_handle(&caller.process, job)
    }

    pub(crate) fn sys_job_set_policy(
        &self,
        caller: &Caller,
        job: usize,
        mode: usize,
        items: usize,
        count: usize,
    ) -> Result<usize> {
        let job = self.resolve_handle::<Job>(&caller.process, handle_arg(job)?, Rights::MANAGE)?;
        let mode = u32::try_from(mode)
            .ok()
            .and_then(PolicyMode::from_raw)
            .ok_or(Error::InvalidArgs)?;
        if count == 0 || count > POLICY_ITEMS_MAX {
            return Err(Error::InvalidArgs);
        }

        let ptr = UserPtr::new(items, count)?;
        let mut words = vec![0; count];
        ptr.copy_in(caller.process.aspace().as_ref(), &mut words)?;
        let items = words
            .into_iter()
            .map(policy_item)
            .collect::<Result<Vec<_>>>()?;

        self.set_job_policy(&job, mode, &items)?;
        Ok(0)
    }

    pub(crate) fn sys_process_create(&self, caller: &Caller, job: usize, name: usize, name_len: usize) -> Result<usize> {
        let job = self.resolve_handle::<Job>(&caller.process, handle_arg(job)?, Rights::MANAGE)?;
        let name = read_name(caller.process.aspace().as_ref(), name, name_len)?;
        let aspace = Arc::new(SoftAspace::new(self.config().vm_max_pages));
        let process = self.create_process_as(&job, &name, aspace, Some(caller))?;
        self.new_object_handle(&caller.process, process)
    }

    pub(crate) fn sys_process_exit(&self, caller: &Caller, code: usize) -> Result<usize> {
        self.process_exit(caller.cpu, code as i64)?;
        Ok(0)
    }

    pub(crate) fn sys_thread_create(&self, caller: &Caller, process: usize, name: usize, name_len: usize) -> Result<usize> {
        let process = self.resolve_handle::<Process>(&caller.process, handle_arg(process)?, Rights::MANAGE)?;
        let name = read_name(caller.process.aspace().as_ref(), name, name_len)?;
        let thread = self.create_thread_as(&process, &name, Some(caller))?;
        self.new_object_handle(&caller.process, thread)
    }

    pub(crate) fn sys_thread_start(&self, caller: &Caller, thread: usize, cpu: usize) -> Result<usize> {
        let thread = self.resolve_handle::<Thread>(&caller.process, handle_arg(thread)?, Rights::MANAGE)?;
        let cpu = CpuId::try_from(cpu).map_err(|_| Error::InvalidArgs)?;
        self.start_thread(&thread, cpu)?;
        Ok(0)
    }

    pub(crate) fn sys_thread_exit(&self, caller: &Caller) -> Result<usize> {
        self.thread_exit(caller.cpu)?;
        Ok(0)
    }

    pub(crate) fn sys_thread_yield(&self, caller: &Caller) -> Result<usize> {
        self.yield_cpu(caller.cpu);
        Ok(0)
    }

    /// Killing something already on its way out is not an error
    pub(crate) fn sys_task_kill(&self, caller: &Caller, task: usize, code: usize) -> Result<usize> {
        let (object, rights) = self.resolve_object(&caller.process, handle_arg(task)?)?;
        rights.require(Rights::MANAGE)?;
        let code = code as i64;

        let killed = match &object {
            KernelObject::Job(job) => self.kill_job(caller.cpu, job, code),
            KernelObject::Process(process) => self.kill_process(caller.cpu, process, code),
            KernelObject::Thread(thread) => self.kill_thread(caller.cpu, thread),
        };
        log_debug!(
            "task_kill: {} {} by process {}: {}",
            object.obj_type().name(),
            object.koid(),
            caller.process.koid(),
            if killed { "killed" } else { "already dying" }
        );
        Ok(0)
    }
}
