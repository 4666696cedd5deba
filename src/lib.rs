// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Task Core
//!
//! The task and IPC core of the Rustux microkernel: the job/process/thread
//! hierarchy, a per-CPU cooperative round-robin scheduler, wait queues and
//! counting semaphores, a handle-based capability layer and synchronous
//! rendezvous IPC with map/grant region transfer.
//!
//! # Organization
//!
//! - [`rustux`] - Status codes, error type and primitive aliases
//! - [`kernel`] - The [`Kernel`] state and every subsystem operating on it
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{Kernel, KernelConfig};
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let root = kernel.root_job();
//! let process = kernel.create_process(&root, "init").unwrap();
//! let thread = kernel.create_thread(&process, "main").unwrap();
//! kernel.start_thread(&thread, 0).unwrap();
//! kernel.reschedule(0);
//! assert!(kernel.is_current(0, &thread));
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod rustux;

pub mod kernel;

pub use kernel::init::KernelConfig;
pub use kernel::ipc::{Acceptor, Fpage, IpcStatus, MessageItem, MessageTag, PageRights};
pub use kernel::object::handle::{HandleValue, Rights};
pub use kernel::object::job::{Job, JobPolicy, JobStatus, PolicyAction, PolicyCondition};
pub use kernel::process::{Process, ProcessState};
pub use kernel::sched::Syscall;
pub use kernel::thread::{Thread, ThreadState};
pub use kernel::timer::Deadline;
pub use kernel::Kernel;
pub use rustux::errors::{Error, Result};
