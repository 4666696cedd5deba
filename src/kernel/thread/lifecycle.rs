// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Lifecycle
//!
//! Creation, start, kill and reaping. A killed thread is never torn down on
//! the spot: it is marked dying and parked on its CPU's zombie queue, and the
//! next timer tick on that CPU reaps it. Reaping is what releases the
//! thread's place in its process, which in turn may let the process and its
//! job go dead.
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{Kernel, KernelConfig, ThreadState};
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let process = kernel.create_process(&kernel.root_job(), "app").unwrap();
//! let thread = kernel.create_thread(&process, "worker").unwrap();
//! assert_eq!(kernel.thread_state(&thread), ThreadState::Embryo);
//!
//! kernel.start_thread(&thread, 0).unwrap();
//! kernel.kill_thread(0, &thread);
//! assert_eq!(kernel.thread_state(&thread), ThreadState::Dying);
//!
//! kernel.handle_timer_tick(0);
//! assert_eq!(kernel.thread_state(&thread), ThreadState::Unused);
//! ```

use alloc::sync::Arc;

use crate::kernel::object::job::PolicyCondition;
use crate::kernel::percpu::BOOT_CPU_ID;
use crate::kernel::process::Process;
use crate::kernel::sched::SchedState;
use crate::kernel::syscalls::Caller;
use crate::kernel::thread::{describe, QueueLink, Thread, ThreadIndex, ThreadRecord, ThreadState};
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::CpuId;
use crate::{kassert, log_debug, log_info};

impl SchedState {
    /// Kill a thread in whatever state it is in
    ///
    /// Queued and sleeping threads move straight to the zombie queue; a
    /// running thread is flagged and diverted there when its CPU next
    /// schedules. Returns `false` if the thread was already dying or gone.
    pub(crate) fn kill_thread(&mut self, thread: ThreadIndex) -> bool {
        let (state, link, cpu) = match self.threads.get(thread) {
            Some(record) if !record.idle => (record.state, record.link, record.cpu),
            _ => return false,
        };

        match state {
            ThreadState::Embryo | ThreadState::Runnable => {
                if let QueueLink::RunQueue(queue_cpu) = link {
                    let removed = self.cpu_mut(queue_cpu).class.dequeue(thread);
                    kassert!(removed, "{:?} missing from run queue {}", thread, queue_cpu);
                    self.threads.record_mut(thread).link = QueueLink::None;
                }
                self.threads.record_mut(thread).state = ThreadState::Dying;
                self.enqueue(thread, cpu);
            }
            ThreadState::Sleeping => {
                self.unlink_waiter(thread);
                let record = self.threads.record_mut(thread);
                record.pending = None;
                record.state = ThreadState::Dying;
                self.enqueue(thread, cpu);
            }
            ThreadState::Running => {
                self.threads.record_mut(thread).state = ThreadState::Dying;
                self.cpu_mut(cpu).need_reschedule = true;
            }
            ThreadState::Dying | ThreadState::Unused => return false,
        }

        self.ipc_peer_closed(thread);
        log_info!("thread {} killed", describe(&self.threads.record(thread).thread));
        true
    }

    /// Reap a thread taken off a zombie queue
    pub(crate) fn finish_dead_transition(&mut self, thread: ThreadIndex) {
        let record = self.threads.remove(thread);
        kassert!(
            record.state == ThreadState::Dying,
            "reaping {:?} in state {}",
            thread,
            record.state.name()
        );
        log_debug!("thread {} reaped", describe(&record.thread));

        if let Some(process) = record.thread.process() {
            if process.remove_thread(record.thread.koid()) == 0 {
                self.finish_process_dead_transition(&process);
            }
        }
    }
}

impl Kernel {
    /// Create a thread in `process`
    ///
    /// The thread starts as an embryo and does not run until
    /// [`start_thread`](Self::start_thread).
    pub fn create_thread(&self, process: &Arc<Process>, name: &str) -> Result<Arc<Thread>> {
        self.create_thread_as(process, name, None)
    }

    pub(crate) fn create_thread_as(
        &self,
        process: &Arc<Process>,
        name: &str,
        requester: Option<&Caller>,
    ) -> Result<Arc<Thread>> {
        let job = process.job().ok_or(Error::BadState)?;
        self.enforce_policy(&job, PolicyCondition::NewThread, requester)?;

        let mut state = self.thread_lock.lock(requester.map_or(BOOT_CPU_ID, |caller| caller.cpu));
        let index = state.threads.insert(|index| {
            ThreadRecord::new(
                Arc::new(Thread::new(index, name, Arc::downgrade(process))),
                BOOT_CPU_ID,
            )
        })?;
        let thread = state.threads.record(index).thread.clone();
        if let Err(err) = process.add_thread(thread.clone()) {
            state.threads.remove(index);
            return Err(err);
        }
        log_debug!("thread {} created in process {}", describe(&thread), process.koid());
        Ok(thread)
    }

    /// Hand an embryo thread to `cpu`'s scheduler
    pub fn start_thread(&self, thread: &Thread, cpu: CpuId) -> Result {
        if cpu as usize >= self.cpu_count() {
            return Err(Error::InvalidArgs);
        }
        let process = thread.process().ok_or(Error::BadState)?;
        let mut state = self.lock_state();
        match state.threads.get(thread.index()) {
            Some(record) if record.state == ThreadState::Embryo => {}
            _ => return Err(Error::BadState),
        }
        process.mark_running()?;
        state.insert(thread.index(), cpu);
        log_debug!("thread {} started on cpu {}", describe(thread), cpu);
        Ok(())
    }

    /// Kill `thread` on behalf of `cpu`
    pub fn kill_thread(&self, cpu: CpuId, thread: &Thread) -> bool {
        let mut state = self.thread_lock.lock(cpu);
        let killed = state.kill_thread(thread.index());
        self.unlock(cpu, state);
        killed
    }

    /// The current thread of `cpu` exits
    pub fn thread_exit(&self, cpu: CpuId) -> Result {
        let mut state = self.thread_lock.lock(cpu);
        let current = state.current(cpu).ok_or(Error::BadState)?;
        state.kill_thread(current);
        state.switch_and_resume(cpu);
        self.unlock(cpu, state);
        Ok(())
    }

    /// Cut `thread`'s interruptible sleep short
    pub fn interrupt(&self, cpu: CpuId, thread: &Thread) -> bool {
        let mut state = self.thread_lock.lock(cpu);
        let woken = state.interrupt(thread.index());
        self.unlock(cpu, state);
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::process::ProcessState;
    use crate::kernel::tests::fixture;

    #[test]
    fn test_start_requires_embryo() {
        let fx = fixture::Fixture::new(1);
        let [a] = fx.threads::<1>();
        assert_eq!(fx.kernel.start_thread(&a, 4), Err(Error::InvalidArgs));
        fx.kernel.start_thread(&a, 0).unwrap();
        assert_eq!(fx.kernel.start_thread(&a, 0), Err(Error::BadState));
        assert_eq!(fx.kernel.queue_link(&a), QueueLink::RunQueue(0));
    }

    #[test]
    fn test_kill_runnable_moves_to_zombie_queue() {
        let fx = fixture::Fixture::started(2);
        let [a, b] = fx.threads::<2>();
        assert!(fx.kernel.kill_thread(0, &a));
        assert!(!fx.kernel.kill_thread(0, &a));
        assert_eq!(fx.kernel.queue_link(&a), QueueLink::ZombieQueue(0));
        assert_eq!(fx.kernel.run_queue(0).len(), 1);

        fx.kernel.reschedule(0);
        assert!(fx.kernel.is_current(0, &b));
        fx.kernel.handle_timer_tick(0);
        assert_eq!(fx.kernel.thread_state(&a), ThreadState::Unused);
        assert_eq!(fx.kernel.sched_stats(0).reaped, 1);
        assert_eq!(fx.process.thread_count(), 1);
    }

    #[test]
    fn test_kill_running_is_deferred_to_schedule() {
        let fx = fixture::Fixture::started(2);
        let [a, b] = fx.threads::<2>();
        fx.kernel.reschedule(0);
        assert!(fx.kernel.is_current(0, &a));

        fx.kernel.kill_thread(0, &a);
        assert_eq!(fx.kernel.thread_state(&a), ThreadState::Dying);
        assert_eq!(fx.kernel.queue_link(&a), QueueLink::None);
        assert!(fx.kernel.need_reschedule(0));

        assert!(fx.kernel.trap_return(0));
        assert!(fx.kernel.is_current(0, &b));
        assert_eq!(fx.kernel.queue_link(&a), QueueLink::ZombieQueue(0));
    }

    #[test]
    fn test_last_thread_exit_ends_process() {
        let fx = fixture::Fixture::started(1);
        let [a] = fx.threads::<1>();
        fx.kernel.reschedule(0);
        fx.kernel.thread_exit(0).unwrap();
        assert!(fx.kernel.current_thread(0).is_none());
        assert_eq!(fx.process.state(), ProcessState::Running);

        fx.kernel.handle_timer_tick(0);
        assert_eq!(fx.kernel.thread_state(&a), ThreadState::Unused);
        assert_eq!(fx.process.state(), ProcessState::Dead);
        assert!(fx.kernel.root_job().processes().is_empty());
    }

    #[test]
    fn test_thread_limit() {
        use crate::kernel::init::KernelConfig;
        let kernel = Kernel::new(KernelConfig {
            max_threads: 2,
            ..KernelConfig::default()
        });
        let process = kernel.create_process(&kernel.root_job(), "p").unwrap();
        kernel.create_thread(&process, "a").unwrap();
        kernel.create_thread(&process, "b").unwrap();
        assert_eq!(kernel.create_thread(&process, "c").err(), Some(Error::NoResources));
        assert_eq!(process.thread_count(), 2);
    }
}
