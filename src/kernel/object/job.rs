// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Job Objects
//!
//! Jobs are containers for processes and other jobs, forming a hierarchical
//! tree structure. They are used for policy enforcement and for tearing down
//! a whole subtree at once.
//!
//! # Design
//!
//! - **Hierarchical**: Jobs form a tree with a single root job; a parent owns
//!   its children, a child refers to its parent weakly
//! - **Bounded depth**: A job deeper than the configured maximum height
//!   cannot be created
//! - **Policy**: A child starts with its parent's policy and can only make it
//!   stricter, so a deny anywhere up the chain cannot be overridden
//! - **Lifecycle**: `READY -> KILLING -> DEAD`. A killed job kills every
//!   descendant and only goes `DEAD` once all of them are dead, then unlinks
//!   itself from its parent
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{JobStatus, Kernel, KernelConfig};
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let child = kernel.create_job(&kernel.root_job(), "services").unwrap();
//! assert_eq!(child.status(), JobStatus::Ready);
//! kernel.kill_job(0, &child, -1);
//! assert_eq!(child.status(), JobStatus::Dead);
//! ```

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::kernel::object::{KernelObjectBase, ObjectType};
use crate::kernel::percpu::BOOT_CPU_ID;
use crate::kernel::process::Process;
use crate::kernel::sched::SchedState;
use crate::kernel::syscalls::Caller;
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{CpuId, Koid};
use crate::{log_debug, log_info};

/// Maximum length of a job name
pub const JOB_NAME_MAX: usize = 64;

/// ============================================================================
/// Job Policy
/// ============================================================================

/// Operations a job policy governs
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCondition {
    /// Creating a process in the job
    NewProcess = 0,

    /// Creating a thread in one of the job's processes
    NewThread = 1,

    /// Creating a child job
    NewJob = 2,

    /// Sending map/grant items from one of the job's processes
    IpcMapGrant = 3,
}

impl PolicyCondition {
    pub const COUNT: usize = 4;

    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::NewProcess),
            1 => Some(Self::NewThread),
            2 => Some(Self::NewJob),
            3 => Some(Self::IpcMapGrant),
            _ => None,
        }
    }
}

/// What happens when a governed operation is attempted
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    Allow = 1,
    Deny = 2,
    /// Deny, and kill the requesting process
    Kill = 3,
    AllowWithException = 4,
    DenyWithException = 5,
}

impl PolicyAction {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Allow),
            2 => Some(Self::Deny),
            3 => Some(Self::Kill),
            4 => Some(Self::AllowWithException),
            5 => Some(Self::DenyWithException),
            _ => None,
        }
    }

    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AllowWithException)
    }

    /// Ordering used when policies meet; higher wins
    const fn strictness(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::AllowWithException => 1,
            Self::DenyWithException => 2,
            Self::Deny => 3,
            Self::Kill => 4,
        }
    }

    fn stricter(self, other: Self) -> Self {
        if other.strictness() > self.strictness() {
            other
        } else {
            self
        }
    }
}

/// How [`Kernel::set_job_policy`] treats an item looser than the inherited
/// policy
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    /// Ignore the item
    Relative = 0,

    /// Fail the whole call
    Absolute = 1,
}

impl PolicyMode {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Relative),
            1 => Some(Self::Absolute),
            _ => None,
        }
    }
}

/// One policy setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyItem {
    pub condition: PolicyCondition,
    pub action: PolicyAction,
}

impl PolicyItem {
    pub const fn new(condition: PolicyCondition, action: PolicyAction) -> Self {
        Self { condition, action }
    }
}

/// Action per condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPolicy {
    actions: [PolicyAction; PolicyCondition::COUNT],
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl JobPolicy {
    pub const fn allow_all() -> Self {
        Self {
            actions: [PolicyAction::Allow; PolicyCondition::COUNT],
        }
    }

    pub fn get(&self, condition: PolicyCondition) -> PolicyAction {
        self.actions[condition as usize]
    }

    fn set(&mut self, condition: PolicyCondition, action: PolicyAction) {
        self.actions[condition as usize] = action;
    }

    /// Condition by condition, the stricter of the two
    pub fn merge(&self, other: &JobPolicy) -> JobPolicy {
        let mut merged = *self;
        for (mine, theirs) in merged.actions.iter_mut().zip(other.actions.iter()) {
            *mine = mine.stricter(*theirs);
        }
        merged
    }
}

/// ============================================================================
/// Job Structure
/// ============================================================================

/// Job lifecycle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Ready = 0,
    Killing = 1,
    Dead = 2,
}

struct JobInner {
    status: JobStatus,
    child_jobs: Vec<Arc<Job>>,
    child_processes: Vec<Arc<Process>>,
    policy: JobPolicy,
    return_code: Option<i64>,
}

/// Job object
pub struct Job {
    pub(crate) base: KernelObjectBase,
    parent: Option<Weak<Job>>,
    height: usize,
    max_height: usize,
    inner: Mutex<JobInner>,
}

impl Job {
    /// Create the root job
    pub fn new_root(max_height: usize) -> Arc<Self> {
        Arc::new(Self {
            base: KernelObjectBase::new(ObjectType::Job, "root", JOB_NAME_MAX),
            parent: None,
            height: 0,
            max_height,
            inner: Mutex::new(JobInner {
                status: JobStatus::Ready,
                child_jobs: Vec::new(),
                child_processes: Vec::new(),
                policy: JobPolicy::allow_all(),
                return_code: None,
            }),
        })
    }

    /// Create a child job and link it under `parent`
    fn new_child(parent: &Arc<Job>, name: &str) -> Result<Arc<Self>> {
        let height = parent.height + 1;
        if height > parent.max_height {
            return Err(Error::OutOfRange);
        }

        let mut inner = parent.inner.lock();
        if inner.status != JobStatus::Ready {
            return Err(Error::BadState);
        }
        let job = Arc::new(Self {
            base: KernelObjectBase::new(ObjectType::Job, name, JOB_NAME_MAX),
            parent: Some(Arc::downgrade(parent)),
            height,
            max_height: parent.max_height,
            inner: Mutex::new(JobInner {
                status: JobStatus::Ready,
                child_jobs: Vec::new(),
                child_processes: Vec::new(),
                policy: inner.policy,
                return_code: None,
            }),
        });
        inner.child_jobs.push(job.clone());
        Ok(job)
    }

    pub fn koid(&self) -> Koid {
        self.base.koid()
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    /// Parent job; `None` for the root job
    pub fn parent(&self) -> Option<Arc<Job>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Depth below the root job
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().status
    }

    /// Code the job was killed with
    pub fn return_code(&self) -> Option<i64> {
        self.inner.lock().return_code
    }

    pub fn policy(&self) -> JobPolicy {
        self.inner.lock().policy
    }

    /// Action this job's policy takes for `condition`
    pub fn check_policy(&self, condition: PolicyCondition) -> PolicyAction {
        self.policy().get(condition)
    }

    pub fn child_jobs(&self) -> Vec<Arc<Job>> {
        self.inner.lock().child_jobs.clone()
    }

    pub fn processes(&self) -> Vec<Arc<Process>> {
        self.inner.lock().child_processes.clone()
    }

    /// Link a new process; the job must still be ready
    pub(crate) fn add_process(&self, process: Arc<Process>) -> Result {
        let mut inner = self.inner.lock();
        if inner.status != JobStatus::Ready {
            return Err(Error::BadState);
        }
        inner.child_processes.push(process);
        Ok(())
    }

    pub(crate) fn remove_process(&self, koid: Koid) {
        self.inner.lock().child_processes.retain(|p| p.koid() != koid);
    }

    fn remove_child_job(&self, koid: Koid) {
        self.inner.lock().child_jobs.retain(|j| j.koid() != koid);
    }

    /// Apply policy items to a job with no children and no processes
    fn set_policy(&self, mode: PolicyMode, items: &[PolicyItem]) -> Result {
        let inherited = self
            .parent()
            .map_or_else(JobPolicy::allow_all, |parent| parent.policy());

        let mut inner = self.inner.lock();
        if inner.status != JobStatus::Ready
            || !inner.child_jobs.is_empty()
            || !inner.child_processes.is_empty()
        {
            return Err(Error::BadState);
        }

        let mut policy = inner.policy;
        for item in items {
            let floor = inherited.get(item.condition);
            if item.action.stricter(floor) != item.action {
                match mode {
                    PolicyMode::Absolute => return Err(Error::AccessDenied),
                    PolicyMode::Relative => continue,
                }
            }
            policy.set(item.condition, item.action);
        }
        inner.policy = policy.merge(&inherited);
        Ok(())
    }
}

/// ============================================================================
/// Lifecycle
/// ============================================================================

impl SchedState {
    /// Kill `job` and everything below it
    ///
    /// Returns `false` if the job was not ready.
    pub(crate) fn kill_job(&mut self, job: &Arc<Job>, code: i64) -> bool {
        let (jobs, processes) = {
            let mut inner = job.inner.lock();
            if inner.status != JobStatus::Ready {
                return false;
            }
            inner.status = JobStatus::Killing;
            inner.return_code = Some(code);
            (inner.child_jobs.clone(), inner.child_processes.clone())
        };
        log_info!(
            "job {} killing: {} jobs, {} processes",
            job.koid(),
            jobs.len(),
            processes.len()
        );

        for child in &jobs {
            self.kill_job(child, code);
        }
        for process in &processes {
            self.kill_process(process, code);
        }
        self.finish_job_dead_transition(job);
        true
    }

    /// Move a killing job with no children left to `DEAD`, unlink it and
    /// re-check its parent
    pub(crate) fn finish_job_dead_transition(&mut self, job: &Arc<Job>) {
        let mut job = job.clone();
        loop {
            {
                let mut inner = job.inner.lock();
                if inner.status != JobStatus::Killing
                    || !inner.child_jobs.is_empty()
                    || !inner.child_processes.is_empty()
                {
                    return;
                }
                inner.status = JobStatus::Dead;
            }
            log_info!("job {} dead", job.koid());

            let parent = match job.parent() {
                Some(parent) => parent,
                None => return,
            };
            parent.remove_child_job(job.koid());
            job = parent;
        }
    }
}

impl Kernel {
    /// Create a child job of `parent`
    pub fn create_job(&self, parent: &Arc<Job>, name: &str) -> Result<Arc<Job>> {
        self.create_job_as(parent, name, None)
    }

    pub(crate) fn create_job_as(
        &self,
        parent: &Arc<Job>,
        name: &str,
        requester: Option<&Caller>,
    ) -> Result<Arc<Job>> {
        self.enforce_policy(parent, PolicyCondition::NewJob, requester)?;
        let _state = self.thread_lock.lock(requester.map_or(BOOT_CPU_ID, |caller| caller.cpu));
        let job = Job::new_child(parent, name)?;
        log_debug!("job {} created under {}", job.koid(), parent.koid());
        Ok(job)
    }

    /// Kill `job` and all descendants
    ///
    /// Returns `false` if the job was already killing or dead.
    pub fn kill_job(&self, cpu: CpuId, job: &Arc<Job>, code: i64) -> bool {
        let mut state = self.thread_lock.lock(cpu);
        let killed = state.kill_job(job, code);
        self.unlock(cpu, state);
        killed
    }

    /// Tighten `job`'s policy
    ///
    /// The job must be ready and have no children or processes. Items looser
    /// than the parent's policy are skipped in relative mode and fail the
    /// call with `AccessDenied` in absolute mode.
    pub fn set_job_policy(&self, job: &Arc<Job>, mode: PolicyMode, items: &[PolicyItem]) -> Result {
        let _state = self.lock_state();
        job.set_policy(mode, items)
    }

    /// Check `condition` against `job`'s policy
    ///
    /// A `Kill` action also kills the requesting process, when there is one.
    pub(crate) fn enforce_policy(
        &self,
        job: &Job,
        condition: PolicyCondition,
        requester: Option<&Caller>,
    ) -> Result {
        let action = job.check_policy(condition);
        if action.is_allowed() {
            return Ok(());
        }
        log_debug!("job {}: {:?} denied ({:?})", job.koid(), condition, action);
        if action == PolicyAction::Kill {
            if let Some(caller) = requester {
                let mut state = self.thread_lock.lock(caller.cpu);
                state.kill_process(&caller.process, -1);
                self.unlock(caller.cpu, state);
            }
        }
        Err(Error::AccessDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::init::KernelConfig;

    fn kernel() -> Kernel {
        Kernel::new(KernelConfig {
            job_max_height: 3,
            ..KernelConfig::default()
        })
    }

    #[test]
    fn test_child_links_under_parent() {
        let k = kernel();
        let root = k.root_job();
        let child = k.create_job(&root, "child").unwrap();
        assert_eq!(child.height(), 1);
        assert_eq!(child.parent().unwrap().koid(), root.koid());
        assert_eq!(root.child_jobs().len(), 1);
    }

    #[test]
    fn test_max_height() {
        let k = kernel();
        let mut job = k.root_job();
        for _ in 0..3 {
            job = k.create_job(&job, "nested").unwrap();
        }
        assert_eq!(k.create_job(&job, "too-deep").err(), Some(Error::OutOfRange));
    }

    #[test]
    fn test_long_name_truncated() {
        let k = kernel();
        let name = "j".repeat(100);
        let job = k.create_job(&k.root_job(), &name).unwrap();
        assert_eq!(job.name().len(), JOB_NAME_MAX);
    }

    #[test]
    fn test_kill_empty_job_is_immediately_dead() {
        let k = kernel();
        let root = k.root_job();
        let job = k.create_job(&root, "empty").unwrap();
        assert!(k.kill_job(0, &job, 7));
        assert_eq!(job.status(), JobStatus::Dead);
        assert_eq!(job.return_code(), Some(7));
        assert!(root.child_jobs().is_empty());
        assert!(!k.kill_job(0, &job, 8));
        assert_eq!(job.return_code(), Some(7));
    }

    #[test]
    fn test_killing_job_rejects_children() {
        let k = kernel();
        let job = k.create_job(&k.root_job(), "parent").unwrap();
        k.kill_job(0, &job, 0);
        assert_eq!(k.create_job(&job, "late").err(), Some(Error::BadState));
    }

    #[test]
    fn test_policy_deny_blocks_creation() {
        let k = kernel();
        let job = k.create_job(&k.root_job(), "locked").unwrap();
        k.set_job_policy(
            &job,
            PolicyMode::Absolute,
            &[PolicyItem::new(PolicyCondition::NewJob, PolicyAction::Deny)],
        )
        .unwrap();
        assert_eq!(k.create_job(&job, "child").err(), Some(Error::AccessDenied));
        assert_eq!(job.check_policy(PolicyCondition::NewProcess), PolicyAction::Allow);
    }

    #[test]
    fn test_policy_child_cannot_widen() {
        let k = kernel();
        let parent = k.create_job(&k.root_job(), "parent").unwrap();
        k.set_job_policy(
            &parent,
            PolicyMode::Absolute,
            &[PolicyItem::new(PolicyCondition::NewProcess, PolicyAction::Deny)],
        )
        .unwrap();
        let child = k.create_job(&parent, "child").unwrap();
        assert_eq!(child.check_policy(PolicyCondition::NewProcess), PolicyAction::Deny);

        let widen = [PolicyItem::new(PolicyCondition::NewProcess, PolicyAction::Allow)];
        assert_eq!(
            k.set_job_policy(&child, PolicyMode::Absolute, &widen).err(),
            Some(Error::AccessDenied)
        );
        k.set_job_policy(&child, PolicyMode::Relative, &widen).unwrap();
        assert_eq!(child.check_policy(PolicyCondition::NewProcess), PolicyAction::Deny);

        // Stricter is always fine
        k.set_job_policy(
            &child,
            PolicyMode::Absolute,
            &[PolicyItem::new(PolicyCondition::NewProcess, PolicyAction::Kill)],
        )
        .unwrap();
        assert_eq!(child.check_policy(PolicyCondition::NewProcess), PolicyAction::Kill);
    }

    #[test]
    fn test_policy_frozen_once_populated() {
        let k = kernel();
        let parent = k.create_job(&k.root_job(), "parent").unwrap();
        k.create_job(&parent, "child").unwrap();
        assert_eq!(
            k.set_job_policy(
                &parent,
                PolicyMode::Relative,
                &[PolicyItem::new(PolicyCondition::NewThread, PolicyAction::Deny)]
            )
            .err(),
            Some(Error::BadState)
        );
    }

    #[test]
    fn test_merge_takes_stricter() {
        let mut a = JobPolicy::allow_all();
        a.set(PolicyCondition::NewJob, PolicyAction::DenyWithException);
        let mut b = JobPolicy::allow_all();
        b.set(PolicyCondition::NewJob, PolicyAction::AllowWithException);
        b.set(PolicyCondition::NewThread, PolicyAction::Kill);
        let merged = a.merge(&b);
        assert_eq!(merged.get(PolicyCondition::NewJob), PolicyAction::DenyWithException);
        assert_eq!(merged.get(PolicyCondition::NewThread), PolicyAction::Kill);
        assert_eq!(merged.get(PolicyCondition::IpcMapGrant), PolicyAction::Allow);
    }
}
