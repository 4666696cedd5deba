// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Initialization
//!
//! Builds a [`Kernel`] from a [`KernelConfig`]. The configuration normally
//! comes from the boot command line; values outside the supported range are
//! clamped with a warning rather than rejected.
//!
//! # Initialization Order
//!
//! 1. Per-CPU schedulers and their idle threads
//! 2. The handle table
//! 3. The root job
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{Kernel, KernelConfig};
//!
//! let config = KernelConfig::from_cmdline("kernel.smp.cpus=2 kernel.task.max_threads=64");
//! assert_eq!(config.cpu_count, 2);
//! let kernel = Kernel::new(config);
//! assert_eq!(kernel.cpu_count(), 2);
//! ```

use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;

use spin::Mutex;

use crate::kernel::cmdline::Cmdline;
use crate::kernel::object::handle::{HandleTable, HANDLE_SLOT_MAX};
use crate::kernel::object::job::Job;
use crate::kernel::percpu::SMP_MAX_CPUS;
use crate::kernel::sched::{SchedState, Scheduler};
use crate::kernel::thread_lock::ThreadLock;
use crate::kernel::Kernel;
use crate::rustux::types::CpuId;
use crate::{log_debug, log_info, log_warn};

/// ============================================================================
/// Configuration
/// ============================================================================

/// Default thread limit
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// Largest thread limit accepted
pub const MAX_THREADS_LIMIT: usize = 65536;

/// Default handle table size
pub const DEFAULT_MAX_HANDLES: usize = 4096;

/// Default maximum job nesting depth
pub const DEFAULT_JOB_MAX_HEIGHT: usize = 16;

/// Largest job nesting depth accepted
pub const JOB_MAX_HEIGHT_LIMIT: usize = 64;

/// Default page budget of a software address space
pub const DEFAULT_VM_MAX_PAGES: usize = 65536;

/// Boot-time tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// `kernel.smp.cpus`
    pub cpu_count: usize,

    /// `kernel.task.max_threads`, idle threads not included
    pub max_threads: usize,

    /// `kernel.handle.max`
    pub max_handles: usize,

    /// `kernel.job.max_height`; the root job is at height 0
    pub job_max_height: usize,

    /// `kernel.vm.max_pages`
    pub vm_max_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cpu_count: 1,
            max_threads: DEFAULT_MAX_THREADS,
            max_handles: DEFAULT_MAX_HANDLES,
            job_max_height: DEFAULT_JOB_MAX_HEIGHT,
            vm_max_pages: DEFAULT_VM_MAX_PAGES,
        }
    }
}

impl KernelConfig {
    /// Read the configuration from boot arguments
    pub fn from_cmdline(data: &str) -> Self {
        let cmdline = Cmdline::parse(data);
        let defaults = Self::default();
        let get = |key: &str, default: usize| cmdline.get_uint64(key, default as u64) as usize;

        Self {
            cpu_count: get("kernel.smp.cpus", defaults.cpu_count),
            max_threads: get("kernel.task.max_threads", defaults.max_threads),
            max_handles: get("kernel.handle.max", defaults.max_handles),
            job_max_height: get("kernel.job.max_height", defaults.job_max_height),
            vm_max_pages: get("kernel.vm.max_pages", defaults.vm_max_pages),
        }
        .clamped()
    }

    /// Bring every value into its supported range
    pub fn clamped(self) -> Self {
        Self {
            cpu_count: clamp("kernel.smp.cpus", self.cpu_count, 1, SMP_MAX_CPUS),
            max_threads: clamp("kernel.task.max_threads", self.max_threads, 1, MAX_THREADS_LIMIT),
            max_handles: clamp("kernel.handle.max", self.max_handles, 1, HANDLE_SLOT_MAX),
            job_max_height: clamp("kernel.job.max_height", self.job_max_height, 1, JOB_MAX_HEIGHT_LIMIT),
            vm_max_pages: clamp("kernel.vm.max_pages", self.vm_max_pages, 1, usize::MAX),
        }
    }
}

fn clamp(key: &str, value: usize, min: usize, max: usize) -> usize {
    let clamped = value.clamp(min, max);
    if clamped != value {
        log_warn!("{}={} out of range, using {}", key, value, clamped);
    }
    clamped
}

/// ============================================================================
/// Kernel Construction
/// ============================================================================

impl Kernel {
    /// Initialize the kernel
    pub fn new(config: KernelConfig) -> Self {
        let config = config.clamped();
        log_info!(
            "Rustux task core initializing: {} cpus, {} threads, {} handles",
            config.cpu_count,
            config.max_threads,
            config.max_handles
        );

        let schedulers: Vec<Scheduler> = (0..config.cpu_count as CpuId).map(Scheduler::new).collect();
        let state = SchedState::new(config.cpu_count, config.max_threads);
        log_debug!("init: {} idle threads created", config.cpu_count);

        let root_job = Job::new_root(config.job_max_height);
        log_debug!("init: root job {}", root_job.koid());

        Self {
            config,
            thread_lock: ThreadLock::new(state),
            schedulers,
            handles: Mutex::new(HandleTable::new(config.max_handles)),
            root_job,
            clock: AtomicU64::new(0),
        }
    }
}
