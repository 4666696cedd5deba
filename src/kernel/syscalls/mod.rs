// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! System Call Interface
//!
//! Decodes a syscall number and six argument slots into the kernel entry
//! points. The calling thread is always the current thread of the CPU the
//! call arrives on; handles are resolved against that thread's process.
//!
//! # Design Rules
//!
//! - **Stability**: Syscall numbers are part of the ABI; only append
//! - **Object-based**: Every object is named by a handle carrying rights
//! - **Handles first**: Handles are resolved before the thread lock is taken
//!
//! # Error Return Convention
//!
//! ```text
//! Success: return value (positive or zero)
//! Failure: negative error code
//! ```
//!
//! A call that blocks returns [`Syscall::Blocked`]; its result reaches the
//! thread through [`Kernel::take_return`] once it runs again.

use alloc::sync::Arc;

use crate::kernel::process::Process;
use crate::kernel::sched::Syscall;
use crate::kernel::thread::Thread;
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::CpuId;
use crate::{log_debug, log_trace};

pub mod handle_ops;
pub mod ipc;
pub mod task;

/// ============================================================================
/// Syscall Numbers (Stable v1)
/// ============================================================================

/// System call numbers
///
/// These numbers are frozen as part of the stable ABI v1.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum SyscallNumber {
    // Process & Thread (0x001-0x00F)

    /// Create new process under job
    rx_process_create = 0x01,

    /// Create thread in process
    rx_thread_create = 0x03,

    /// Begin thread execution
    rx_thread_start = 0x04,

    /// Terminate calling thread
    rx_thread_exit = 0x05,

    /// Terminate calling process
    rx_process_exit = 0x06,

    /// Close handle
    rx_handle_close = 0x07,

    /// Handle to the calling thread
    rx_thread_self = 0x08,

    /// Handle to the calling process
    rx_process_self = 0x09,

    /// Kill a job, process or thread
    rx_task_kill = 0x0A,

    /// Give up the CPU
    rx_thread_yield = 0x0B,

    // Jobs & Handles (0x030-0x03F)

    /// Create job under parent
    rx_job_create = 0x30,

    /// Duplicate handle with rights
    rx_handle_duplicate = 0x31,

    /// Koid of the object behind a handle
    rx_object_get_koid = 0x33,

    /// Narrow a job's policy
    rx_job_set_policy = 0x34,

    // IPC (0x050-0x05F)

    /// Send the message registers to a thread
    rx_ipc_send = 0x50,

    /// Receive a message from a thread
    rx_ipc_receive = 0x51,

    /// Send, then receive the reply
    rx_ipc_call = 0x52,

    /// Load tag and message words from user memory
    rx_ipc_load_message = 0x53,

    /// Store message words to user memory
    rx_ipc_store_message = 0x54,

    /// Set the receive window
    rx_ipc_accept = 0x55,

    /// Write a buffer register
    rx_ipc_set_br = 0x56,

    /// Read a message register
    rx_ipc_get_mr = 0x57,

    /// Write a message register
    rx_ipc_set_mr = 0x58,

    /// Unknown/invalid syscall number
    Unknown = 0xFFFF,
}

impl SyscallNumber {
    /// Convert from raw number
    pub const fn from_raw(n: u32) -> Self {
        match n {
            0x01 => Self::rx_process_create,
            0x03 => Self::rx_thread_create,
            0x04 => Self::rx_thread_start,
            0x05 => Self::rx_thread_exit,
            0x06 => Self::rx_process_exit,
            0x07 => Self::rx_handle_close,
            0x08 => Self::rx_thread_self,
            0x09 => Self::rx_process_self,
            0x0A => Self::rx_task_kill,
            0x0B => Self::rx_thread_yield,
            0x30 => Self::rx_job_create,
            0x31 => Self::rx_handle_duplicate,
            0x33 => Self::rx_object_get_koid,
            0x34 => Self::rx_job_set_policy,
            0x50 => Self::rx_ipc_send,
            0x51 => Self::rx_ipc_receive,
            0x52 => Self::rx_ipc_call,
            0x53 => Self::rx_ipc_load_message,
            0x54 => Self::rx_ipc_store_message,
            0x55 => Self::rx_ipc_accept,
            0x56 => Self::rx_ipc_set_br,
            0x57 => Self::rx_ipc_get_mr,
            0x58 => Self::rx_ipc_set_mr,
            _ => Self::Unknown,
        }
    }

    /// Get the syscall name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::rx_process_create => "rx_process_create",
            Self::rx_thread_create => "rx_thread_create",
            Self::rx_thread_start => "rx_thread_start",
            Self::rx_thread_exit => "rx_thread_exit",
            Self::rx_process_exit => "rx_process_exit",
            Self::rx_handle_close => "rx_handle_close",
            Self::rx_thread_self => "rx_thread_self",
            Self::rx_process_self => "rx_process_self",
            Self::rx_task_kill => "rx_task_kill",
            Self::rx_thread_yield => "rx_thread_yield",
            Self::rx_job_create => "rx_job_create",
            Self::rx_handle_duplicate => "rx_handle_duplicate",
            Self::rx_object_get_koid => "rx_object_get_koid",
            Self::rx_job_set_policy => "rx_job_set_policy",
            Self::rx_ipc_send => "rx_ipc_send",
            Self::rx_ipc_receive => "rx_ipc_receive",
            Self::rx_ipc_call => "rx_ipc_call",
            Self::rx_ipc_load_message => "rx_ipc_load_message",
            Self::rx_ipc_store_message => "rx_ipc_store_message",
            Self::rx_ipc_accept => "rx_ipc_accept",
            Self::rx_ipc_set_br => "rx_ipc_set_br",
            Self::rx_ipc_get_mr => "rx_ipc_get_mr",
            Self::rx_ipc_set_mr => "rx_ipc_set_mr",
            Self::Unknown => "unknown",
        }
    }
}

/// ============================================================================
/// Syscall Arguments
/// ============================================================================

/// System call arguments
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    /// Syscall number
    pub number: u32,

    /// Arguments (up to 6)
    pub args: [usize; 6],
}

impl SyscallArgs {
    pub const fn new(number: SyscallNumber, args: [usize; 6]) -> Self {
        Self {
            number: number as u32,
            args,
        }
    }

    /// Get argument at index; missing slots read as zero
    pub const fn arg(&self, index: usize) -> usize {
        if index < 6 {
            self.args[index]
        } else {
            0
        }
    }
}

/// ============================================================================
/// Syscall Return Values
/// ============================================================================

/// System call return value
///
/// Success: positive or zero value
/// Failure: negative error code
pub type SyscallRet = isize;

/// Convert error to return value
#[inline]
pub const fn err_to_ret(err: Error) -> SyscallRet {
    err as i32 as SyscallRet
}

/// Convert success value to return value
#[inline]
pub const fn ok_to_ret(val: usize) -> SyscallRet {
    val as SyscallRet
}

/// Fold a completed call into its ABI value
pub fn into_ret(result: Result<usize>) -> SyscallRet {
    match result {
        Ok(val) => ok_to_ret(val),
        Err(err) => err_to_ret(err),
    }
}

/// The thread making a syscall
pub(crate) struct Caller {
    pub cpu: CpuId,
    pub thread: Arc<Thread>,
    pub process: Arc<Process>,
}

/// ============================================================================
/// Syscall Dispatcher
/// ============================================================================

impl Kernel {
    /// Run syscall `args` for the current thread of `cpu`
    pub fn syscall_dispatch(&self, cpu: CpuId, args: SyscallArgs) -> Syscall<usize> {
        let num = SyscallNumber::from_raw(args.number);
        log_trace!(
            "syscall: cpu {} num={:#x} ({}) args=[{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}]",
            cpu,
            args.number,
            num.name(),
            args.args[0],
            args.args[1],
            args.args[2],
            args.args[3],
            args.args[4],
            args.args[5]
        );

        let caller = match self.caller(cpu) {
            Ok(caller) => caller,
            Err(err) => return Syscall::Complete(Err(err)),
        };

        let a = |i| args.arg(i);
        match num {
            // Process & Thread
            SyscallNumber::rx_process_create => self.sys_process_create(&caller, a(0), a(1), a(2)).into(),
            SyscallNumber::rx_thread_create => self.sys_thread_create(&caller, a(0), a(1), a(2)).into(),
            SyscallNumber::rx_thread_start => self.sys_thread_start(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_thread_exit => self.sys_thread_exit(&caller).into(),
            SyscallNumber::rx_process_exit => self.sys_process_exit(&caller, a(0)).into(),
            SyscallNumber::rx_handle_close => self.sys_handle_close(&caller, a(0)).into(),
            SyscallNumber::rx_thread_self => self.sys_thread_self(&caller).into(),
            SyscallNumber::rx_process_self => self.sys_process_self(&caller).into(),
            SyscallNumber::rx_task_kill => self.sys_task_kill(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_thread_yield => self.sys_thread_yield(&caller).into(),

            // Jobs & Handles
            SyscallNumber::rx_job_create => self.sys_job_create(&caller, a(0), a(1), a(2)).into(),
            SyscallNumber::rx_handle_duplicate => self.sys_handle_duplicate(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_object_get_koid => self.sys_object_get_koid(&caller, a(0)).into(),
            SyscallNumber::rx_job_set_policy => self.sys_job_set_policy(&caller, a(0), a(1), a(2), a(3)).into(),

            // IPC
            SyscallNumber::rx_ipc_send => self.sys_ipc_send(&caller, a(0), a(1)),
            SyscallNumber::rx_ipc_receive => self.sys_ipc_receive(&caller, a(0), a(1)),
            SyscallNumber::rx_ipc_call => self.sys_ipc_call(&caller, a(0), a(1)),
            SyscallNumber::rx_ipc_load_message => self.sys_ipc_load_message(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_ipc_store_message => self.sys_ipc_store_message(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_ipc_accept => self.sys_ipc_accept(&caller, a(0)).into(),
            SyscallNumber::rx_ipc_set_br => self.sys_ipc_set_br(&caller, a(0), a(1)).into(),
            SyscallNumber::rx_ipc_get_mr => self.sys_ipc_get_mr(&caller, a(0)).into(),
            SyscallNumber::rx_ipc_set_mr => self.sys_ipc_set_mr(&caller, a(0), a(1)).into(),

            SyscallNumber::Unknown => {
                log_debug!("unknown syscall: {:#x}", args.number);
                Syscall::Complete(Err(Error::NotSupported))
            }
        }
    }

    fn caller(&self, cpu: CpuId) -> Result<Caller> {
        if cpu as usize >= self.cpu_count() {
            return Err(Error::InvalidArgs);
        }
        let thread = self.current_thread(cpu).ok_or(Error::BadState)?;
        let process = thread.process().ok_or(Error::BadState)?;
        Ok(Caller { cpu, thread, process })
    }
}

impl From<Result<usize>> for Syscall<usize> {
    fn from(result: Result<usize>) -> Self {
        Syscall::Complete(result)
    }
}
