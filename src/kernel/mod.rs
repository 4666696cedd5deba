// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Rustux Microkernel - Core Kernel Module
//!
//! [`Kernel`] owns all task state. Entry points take the number of the CPU
//! they run on and act for that CPU's current thread, the way a trap handler
//! would.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::rustux::types::{CpuId, Tick};

pub mod cmdline;
pub mod debug;
pub mod init;
pub mod ipc;
pub mod object;
pub mod percpu;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscalls;
pub mod thread;
pub mod thread_lock;
pub mod timer;
pub mod usercopy;
pub mod vm;

#[cfg(test)]
pub(crate) mod tests;

use init::KernelConfig;
use object::handle::HandleTable;
use object::job::Job;
use percpu::BOOT_CPU_ID;
use sched::{SchedState, Scheduler};
use thread_lock::{ThreadLock, ThreadLockGuard};

/// The task core
pub struct Kernel {
    config: KernelConfig,

    /// Governing lock over every thread, queue and the task tree
    pub(crate) thread_lock: ThreadLock<SchedState>,

    /// Per-CPU timer lists
    pub(crate) schedulers: Vec<Scheduler>,

    pub(crate) handles: Mutex<HandleTable>,

    root_job: Arc<Job>,

    /// Ticks since boot
    clock: AtomicU64,
}

impl Kernel {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn cpu_count(&self) -> usize {
        self.config.cpu_count
    }

    /// The job every other job descends from
    pub fn root_job(&self) -> Arc<Job> {
        self.root_job.clone()
    }

    /// Ticks since boot
    pub fn current_tick(&self) -> Tick {
        self.clock.load(Ordering::Acquire)
    }

    /// Clock value for a tick on `cpu`; only the boot CPU advances it
    fn advance_clock(&self, cpu: CpuId) -> Tick {
        if cpu == BOOT_CPU_ID {
            self.clock.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.clock.load(Ordering::Acquire)
        }
    }

    /// Take the thread lock for work not tied to a particular CPU
    pub(crate) fn lock_state(&self) -> ThreadLockGuard<'_, SchedState> {
        self.thread_lock.lock(BOOT_CPU_ID)
    }
}
