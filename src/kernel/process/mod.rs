// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Process Management
//!
//! A process is an address space plus the threads running in it. It belongs
//! to exactly one job, which owns it; the process refers back to the job
//! without keeping it alive.
//!
//! # Design
//!
//! - Processes start with no threads; starting the first one makes the
//!   process running
//! - Killing a process kills every thread in it; the process goes dead when
//!   its last thread is reaped, then leaves its job
//! - A process whose threads all exit on their own dies the same way
//!
//! # Process States
//!
//! ```text
//! Creating -> Running -> Exiting -> Dead
//! ```
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{Kernel, KernelConfig, ProcessState};
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let process = kernel.create_process(&kernel.root_job(), "shell").unwrap();
//! assert_eq!(process.state(), ProcessState::Creating);
//!
//! let thread = kernel.create_thread(&process, "main").unwrap();
//! kernel.start_thread(&thread, 0).unwrap();
//! assert_eq!(process.state(), ProcessState::Running);
//! ```

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::kernel::object::job::{Job, PolicyCondition};
use crate::kernel::object::{KernelObjectBase, ObjectType, OBJECT_NAME_MAX};
use crate::kernel::percpu::BOOT_CPU_ID;
use crate::kernel::sched::SchedState;
use crate::kernel::syscalls::Caller;
use crate::kernel::thread::Thread;
use crate::kernel::vm::{AddressSpace, SoftAspace};
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{CpuId, Koid};
use crate::{log_debug, log_info};

/// ============================================================================
/// Process State
/// ============================================================================

/// Process state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Created, no thread started yet
    Creating = 0,

    /// At least one thread has been started
    Running = 1,

    /// Killed; threads are being torn down
    Exiting = 2,

    /// Every thread is gone
    Dead = 3,
}

impl ProcessState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Exiting => "exiting",
            Self::Dead => "dead",
        }
    }
}

struct ProcessInner {
    state: ProcessState,
    threads: Vec<Arc<Thread>>,
    return_code: Option<i64>,
}

/// ============================================================================
/// Process Structure
/// ============================================================================

/// Process object
pub struct Process {
    pub(crate) base: KernelObjectBase,
    job: Weak<Job>,
    aspace: Arc<dyn AddressSpace>,
    inner: Mutex<ProcessInner>,
}

impl Process {
    fn new(job: &Arc<Job>, name: &str, aspace: Arc<dyn AddressSpace>) -> Self {
        Self {
            base: KernelObjectBase::new(ObjectType::Process, name, OBJECT_NAME_MAX),
            job: Arc::downgrade(job),
            aspace,
            inner: Mutex::new(ProcessInner {
                state: ProcessState::Creating,
                threads: Vec::new(),
                return_code: None,
            }),
        }
    }

    pub fn koid(&self) -> Koid {
        self.base.koid()
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Owning job, while it exists
    pub fn job(&self) -> Option<Arc<Job>> {
        self.job.upgrade()
    }

    pub fn aspace(&self) -> &Arc<dyn AddressSpace> {
        &self.aspace
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn return_code(&self) -> Option<i64> {
        self.inner.lock().return_code
    }

    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.inner.lock().threads.clone()
    }

    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.len()
    }

    /// Add a thread; refused once the process is exiting
    pub(crate) fn add_thread(&self, thread: Arc<Thread>) -> Result {
        let mut inner = self.inner.lock();
        match inner.state {
            ProcessState::Creating | ProcessState::Running => {
                inner.threads.push(thread);
                Ok(())
            }
            ProcessState::Exiting | ProcessState::Dead => Err(Error::BadState),
        }
    }

    /// Remove a reaped thread, returning how many are left
    pub(crate) fn remove_thread(&self, koid: Koid) -> usize {
        let mut inner = self.inner.lock();
        inner.threads.retain(|t| t.koid() != koid);
        inner.threads.len()
    }

    /// First thread started
    pub(crate) fn mark_running(&self) -> Result {
        let mut inner = self.inner.lock();
        match inner.state {
            ProcessState::Creating => {
                inner.state = ProcessState::Running;
                Ok(())
            }
            ProcessState::Running => Ok(()),
            ProcessState::Exiting | ProcessState::Dead => Err(Error::BadState),
        }
    }
}

/// ============================================================================
/// Lifecycle
/// ============================================================================

impl SchedState {
    /// Kill every thread of `process`
    ///
    /// Returns `false` if the process was already exiting or dead.
    pub(crate) fn kill_process(&mut self, process: &Arc<Process>, code: i64) -> bool {
        let threads = {
            let mut inner = process.inner.lock();
            if matches!(inner.state, ProcessState::Exiting | ProcessState::Dead) {
                return false;
            }
            inner.state = ProcessState::Exiting;
            inner.return_code = Some(code);
            inner.threads.clone()
        };
        log_info!(
            "process {} killed ({}), {} threads",
            process.koid(),
            code,
            threads.len()
        );

        for thread in &threads {
            self.kill_thread(thread.index());
        }
        self.finish_process_dead_transition(process);
        true
    }

    /// Mark a started process with no threads left dead and unlink it from
    /// its job
    pub(crate) fn finish_process_dead_transition(&mut self, process: &Arc<Process>) {
        {
            let mut inner = process.inner.lock();
            if !inner.threads.is_empty()
                || matches!(inner.state, ProcessState::Creating | ProcessState::Dead)
            {
                return;
            }
            inner.state = ProcessState::Dead;
        }
        log_info!("process {} dead", process.koid());
        self.dead_owners.push(process.koid());

        if let Some(job) = process.job() {
            job.remove_process(process.koid());
            self.finish_job_dead_transition(&job);
        }
    }
}

impl Kernel {
    /// Create a process in `job` with a software address space
    pub fn create_process(&self, job: &Arc<Job>, name: &str) -> Result<Arc<Process>> {
        let aspace = Arc::new(SoftAspace::new(self.config().vm_max_pages));
        self.create_process_with_aspace(job, name, aspace)
    }

    /// Create a process in `job` around an existing address space
    pub fn create_process_with_aspace(
        &self,
        job: &Arc<Job>,
        name: &str,
        aspace: Arc<dyn AddressSpace>,
    ) -> Result<Arc<Process>> {
        self.create_process_as(job, name, aspace, None)
    }

    pub(crate) fn create_process_as(
        &self,
        job: &Arc<Job>,
        name: &str,
        aspace: Arc<dyn AddressSpace>,
        requester: Option<&Caller>,
    ) -> Result<Arc<Process>> {
        self.enforce_policy(job, PolicyCondition::NewProcess, requester)?;

        let _state = self.thread_lock.lock(requester.map_or(BOOT_CPU_ID, |caller| caller.cpu));
        let process = Arc::new(Process::new(job, name, aspace));
        job.add_process(process.clone())?;
        log_debug!("process {} created in job {}", process.koid(), job.koid());
        Ok(process)
    }

    /// Kill `process` and all of its threads
    ///
    /// The process goes dead once its last thread has been reaped.
    pub fn kill_process(&self, cpu: CpuId, process: &Arc<Process>, code: i64) -> bool {
        let mut state = self.thread_lock.lock(cpu);
        let killed = state.kill_process(process, code);
        self.unlock(cpu, state);
        killed
    }

    /// The current thread of `cpu` ends its own process
    pub fn process_exit(&self, cpu: CpuId, code: i64) -> Result {
        let mut state = self.thread_lock.lock(cpu);
        let current = match state.current(cpu) {
            Some(current) => current,
            None => return Err(Error::BadState),
        };
        let process = match state.threads.record(current).thread.process() {
            Some(process) => process,
            None => return Err(Error::BadState),
        };
        state.kill_process(&process, code);
        state.switch_and_resume(cpu);
        self.unlock(cpu, state);
        Ok(())
    }
}
