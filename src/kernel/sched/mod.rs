// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Scheduler
//!
//! Cooperative round-robin scheduling with one run queue per CPU. The timer
//! tick never switches threads itself: it reaps zombies and raises
//! `need_reschedule`, and the switch happens on the way back to user mode
//! in [`Kernel::trap_return`].
//!
//! # Design
//!
//! - **One governing lock**: [`SchedState`] holds every thread record and
//!   every per-CPU run state; it is only reachable through the thread lock
//! - **Per-CPU timer lock**: Each [`Scheduler`] keeps its timer list under
//!   its own lock, never taken while the thread lock is held
//! - **Continuations**: A thread that blocks inside a kernel operation
//!   leaves a pending operation in its record. When the scheduler switches
//!   back to it the operation continues and its result waits in the record
//!   for [`Kernel::take_return`]
//!
//! # Thread States
//!
//! ```text
//! Embryo -> Runnable -> Running -> Sleeping -> Runnable -> Running
//!              |           |          |
//!              v           v          v
//!            Dying ----> (zombie queue) ----> Unused
//! ```

use alloc::format;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::task::Poll;

use spin::Mutex;

use crate::kernel::percpu::cpu_index;
use crate::kernel::thread::{QueueLink, Thread, ThreadArena, ThreadIndex, ThreadRecord, ThreadState};
use crate::kernel::thread_lock::ThreadLockGuard;
use crate::kernel::timer::{SchedulerTimer, TimerList, TimerOp};
use crate::kernel::Kernel;
use crate::rustux::errors::Result;
use crate::rustux::types::{CpuId, Koid, Tick};
use crate::{kassert, kernel_panic, log_debug, log_trace};

pub mod round_robin;

pub use round_robin::RoundRobin;

/// ============================================================================
/// Syscall Completion
/// ============================================================================

/// Outcome of a kernel entry point that may block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall<T> {
    /// Finished without sleeping
    Complete(Result<T>),

    /// The calling thread went to sleep; its result is delivered through
    /// [`Kernel::take_return`] once the operation finishes
    Blocked,
}

impl<T> Syscall<T> {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Syscall::Blocked)
    }

    /// The result, if the call did not block
    pub fn complete(self) -> Option<Result<T>> {
        match self {
            Syscall::Complete(result) => Some(result),
            Syscall::Blocked => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Syscall<U> {
        match self {
            Syscall::Complete(result) => Syscall::Complete(result.map(f)),
            Syscall::Blocked => Syscall::Blocked,
        }
    }
}

impl<T> From<Poll<Result<T>>> for Syscall<T> {
    fn from(poll: Poll<Result<T>>) -> Self {
        match poll {
            Poll::Ready(result) => Syscall::Complete(result),
            Poll::Pending => Syscall::Blocked,
        }
    }
}

/// ============================================================================
/// Scheduler Statistics
/// ============================================================================

/// Scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Number of times a thread was picked
    pub schedules: u64,

    /// Number of voluntary yields
    pub yields: u64,

    /// Number of switches forced by `need_reschedule`
    pub preemptions: u64,

    /// Number of times the idle thread was picked
    pub idle_cycles: u64,

    /// Threads reaped from the zombie queue
    pub reaped: u64,
}

/// ============================================================================
/// Per-CPU Scheduler State
/// ============================================================================

/// Run state of one CPU, guarded by the thread lock
#[derive(Debug)]
pub struct CpuRunState {
    pub class: RoundRobin,
    pub current: ThreadIndex,
    pub idle: ThreadIndex,
    pub need_reschedule: bool,
    pub stats: SchedulerStats,
}

/// Everything the governing thread lock protects
pub struct SchedState {
    pub(crate) threads: ThreadArena,
    pub(crate) cpus: Vec<CpuRunState>,
    /// Timer list changes made by sleeps since the lock was taken
    pub(crate) timer_ops: Vec<(CpuId, TimerOp)>,
    /// Clock value as of the last tick
    pub(crate) now: Tick,
    /// Processes that died since the lock was taken; their handles are
    /// closed once it is dropped
    pub(crate) dead_owners: Vec<Koid>,
}

impl SchedState {
    pub(crate) fn new(cpu_count: usize, max_threads: usize) -> Self {
        let mut threads = ThreadArena::new(max_threads + cpu_count);
        let mut cpus = Vec::with_capacity(cpu_count);
        for cpu in 0..cpu_count as CpuId {
            let name = format!("idle/{}", cpu);
            let idle = threads.insert(|index| {
                let mut record = ThreadRecord::new(Arc::new(Thread::new(index, &name, Weak::new())), cpu);
                record.idle = true;
                record.state = ThreadState::Running;
                record
            });
            let idle = match idle {
                Ok(idle) => idle,
                Err(err) => kernel_panic!("no thread slot for idle/{}: {}", cpu, err),
            };
            cpus.push(CpuRunState {
                class: RoundRobin::new(cpu),
                current: idle,
                idle,
                need_reschedule: false,
                stats: SchedulerStats::default(),
            });
        }
        Self {
            threads,
            cpus,
            timer_ops: Vec::new(),
            now: 0,
            dead_owners: Vec::new(),
        }
    }

    pub(crate) fn cpu(&self, cpu: CpuId) -> &CpuRunState {
        &self.cpus[cpu_index(cpu, self.cpus.len())]
    }

    pub(crate) fn cpu_mut(&mut self, cpu: CpuId) -> &mut CpuRunState {
        let index = cpu_index(cpu, self.cpus.len());
        &mut self.cpus[index]
    }

    /// Current thread of `cpu`, unless it is idle
    pub(crate) fn current(&self, cpu: CpuId) -> Option<ThreadIndex> {
        let run = self.cpu(cpu);
        (run.current != run.idle).then_some(run.current)
    }

    /// Link `thread` onto `cpu`'s run queue, or its zombie queue if dying
    pub(crate) fn enqueue(&mut self, thread: ThreadIndex, cpu: CpuId) {
        let record = self.threads.record(thread);
        if record.link != QueueLink::None {
            kernel_panic!("{:?} already enqueued on {:?}", thread, record.link);
        }
        kassert!(!record.idle, "idle thread {:?} enqueued", thread);
        let dying = record.state == ThreadState::Dying;

        let link = self.cpu_mut(cpu).class.enqueue(thread, dying);
        let record = self.threads.record_mut(thread);
        record.link = link;
        record.cpu = cpu;
    }

    /// Make a sleeping thread runnable
    pub fn unblock(&mut self, thread: ThreadIndex) {
        let record = self.threads.record_mut(thread);
        if record.link != QueueLink::None {
            kernel_panic!("unblock: {:?} already enqueued on {:?}", thread, record.link);
        }
        kassert!(
            record.state == ThreadState::Sleeping,
            "unblock: {:?} is {}",
            thread,
            record.state.name()
        );
        record.state = ThreadState::Runnable;
        let cpu = record.cpu;
        self.enqueue(thread, cpu);
    }

    /// Hand a new thread to the scheduler
    pub fn insert(&mut self, thread: ThreadIndex, cpu: CpuId) {
        let record = self.threads.record_mut(thread);
        kassert!(
            record.state == ThreadState::Embryo,
            "insert: {:?} is {}",
            thread,
            record.state.name()
        );
        record.state = ThreadState::Runnable;
        self.enqueue(thread, cpu);
    }

    /// Put the running thread of `cpu` back on the tail of its run queue
    fn requeue_current(&mut self, cpu: CpuId) {
        let current = self.cpu(cpu).current;
        let record = self.threads.record_mut(current);
        if record.idle || record.state != ThreadState::Running {
            return;
        }
        record.state = ThreadState::Runnable;
        self.enqueue(current, cpu);
    }

    /// Switch `cpu` to the next runnable thread, or its idle thread
    pub(crate) fn schedule(&mut self, cpu: CpuId) {
        let prev = self.cpu(cpu).current;
        let record = self.threads.record(prev);
        let (prev_state, prev_link) = (record.state, record.link);
        if record.idle {
            self.threads.record_mut(prev).state = ThreadState::Runnable;
        } else {
            match prev_state {
                ThreadState::Running => kernel_panic!("schedule: {:?} is still running", prev),
                ThreadState::Dying if prev_link == QueueLink::None => self.enqueue(prev, cpu),
                _ => {}
            }
        }

        let run = self.cpu_mut(cpu);
        let next = run.class.fetch().unwrap_or(run.idle);
        run.current = next;
        run.need_reschedule = false;
        run.stats.schedules += 1;
        if next == run.idle {
            run.stats.idle_cycles += 1;
        }

        let record = self.threads.record_mut(next);
        if !record.idle {
            kassert!(record.link == QueueLink::RunQueue(cpu), "{:?} fetched while on {:?}", next, record.link);
            kassert!(record.state == ThreadState::Runnable, "{:?} fetched while {}", next, record.state.name());
        }
        record.link = QueueLink::None;
        record.state = ThreadState::Running;
        if prev != next {
            log_trace!("cpu {}: switch {:?} -> {:?}", cpu, prev, next);
        }
    }

    /// Switch threads on `cpu`, continuing any operation the next thread
    /// was blocked in
    ///
    /// A continued operation that blocks again switches once more, so this
    /// only returns with a thread that has nothing left to continue.
    pub(crate) fn switch_and_resume(&mut self, cpu: CpuId) {
        loop {
            self.schedule(cpu);
            let current = self.cpu(cpu).current;
            let record = self.threads.record_mut(current);
            let op = match record.pending.take() {
                Some(op) => op,
                None => return,
            };
            let woke = match record.wake_result.take() {
                Some(woke) => woke,
                None => kernel_panic!("{:?} resumed without a wake result", current),
            };
            if let Poll::Ready(result) = self.resume(current, op, woke) {
                self.threads.record_mut(current).ret = Some(result);
                return;
            }
        }
    }

    /// Scheduler-class tick: reap zombies and ask for a reschedule
    pub(crate) fn class_tick(&mut self, cpu: CpuId) {
        let zombies = self.cpu_mut(cpu).class.take_zombies();
        for zombie in zombies {
            self.threads.record_mut(zombie).link = QueueLink::None;
            self.finish_dead_transition(zombie);
            self.cpu_mut(cpu).stats.reaped += 1;
        }
        self.cpu_mut(cpu).need_reschedule = true;
    }

    /// Move the newest runnable thread of `victim` over to `cpu`
    pub(crate) fn steal(&mut self, cpu: CpuId, victim: CpuId) -> Option<ThreadIndex> {
        if cpu == victim {
            return None;
        }
        let thread = self.cpu_mut(victim).class.steal()?;
        self.threads.record_mut(thread).link = QueueLink::None;
        self.enqueue(thread, cpu);
        log_debug!("cpu {} stole {:?} from cpu {}", cpu, thread, victim);
        Some(thread)
    }

    /// Run queue of `cpu` in pick order
    pub(crate) fn run_queue(&self, cpu: CpuId) -> Vec<ThreadIndex> {
        self.cpu(cpu).class.run_queue().collect()
    }

    /// Install `thread` as the running thread of `cpu` without a switch
    #[cfg(test)]
    pub(crate) fn make_current(&mut self, cpu: CpuId, thread: ThreadIndex) {
        let record = self.threads.record_mut(thread);
        kassert!(record.link == QueueLink::None);
        record.state = ThreadState::Running;
        record.cpu = cpu;
        self.cpu_mut(cpu).current = thread;
    }
}

/// ============================================================================
/// Per-CPU Scheduler
/// ============================================================================

/// Per-CPU state kept outside the thread lock
#[derive(Debug)]
pub struct Scheduler {
    cpu: CpuId,
    timer_lock: Mutex<TimerList>,
}

impl Scheduler {
    pub fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            timer_lock: Mutex::new(TimerList::new()),
        }
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    fn apply(&self, op: TimerOp) {
        self.timer_lock.lock().apply(op);
    }

    fn expire(&self, now: Tick) -> Vec<SchedulerTimer> {
        self.timer_lock.lock().pop_expired(now)
    }

    /// Armed timers
    pub fn pending_timers(&self) -> usize {
        self.timer_lock.lock().len()
    }
}

/// ============================================================================
/// Kernel Entry Points
/// ============================================================================

impl Kernel {
    /// Release the thread lock, then apply the timer changes the locked
    /// section queued and close the handles of processes that died in it
    pub(crate) fn unlock(&self, cpu: CpuId, mut state: ThreadLockGuard<'_, SchedState>) {
        let ops = core::mem::take(&mut state.timer_ops);
        let dead_owners = core::mem::take(&mut state.dead_owners);
        drop(state);
        if ops.is_empty() && dead_owners.is_empty() {
            return;
        }
        kassert!(!self.thread_lock.held_by(cpu), "timer lock taken under the thread lock");
        for (target, op) in ops {
            self.scheduler(target).apply(op);
        }
        if !dead_owners.is_empty() {
            let mut handles = self.handles.lock();
            for owner in dead_owners {
                let closed = handles.remove_owned_by(owner);
                log_debug!("process {}: {} handles closed", owner, closed);
            }
        }
    }

    pub(crate) fn scheduler(&self, cpu: CpuId) -> &Scheduler {
        &self.schedulers[cpu_index(cpu, self.schedulers.len())]
    }

    /// Quantum expired: put the current thread at the tail and switch
    pub fn reschedule(&self, cpu: CpuId) {
        let mut state = self.thread_lock.lock(cpu);
        state.requeue_current(cpu);
        state.switch_and_resume(cpu);
        self.unlock(cpu, state);
    }

    /// The current thread gives up the CPU
    pub fn yield_cpu(&self, cpu: CpuId) {
        let mut state = self.thread_lock.lock(cpu);
        state.cpu_mut(cpu).stats.yields += 1;
        state.requeue_current(cpu);
        state.switch_and_resume(cpu);
        self.unlock(cpu, state);
    }

    /// Return-to-user hook: switch if a reschedule was requested
    pub fn trap_return(&self, cpu: CpuId) -> bool {
        let mut state = self.thread_lock.lock(cpu);
        if !state.cpu(cpu).need_reschedule {
            return false;
        }
        state.cpu_mut(cpu).stats.preemptions += 1;
        state.requeue_current(cpu);
        state.switch_and_resume(cpu);
        self.unlock(cpu, state);
        true
    }

    /// Timer interrupt on `cpu`
    ///
    /// The boot CPU advances the clock. Expired timers are collected under
    /// the per-CPU timer lock alone; their sleepers are then woken with
    /// `TimedOut` under the thread lock, after which the scheduling class
    /// reaps zombies and requests a reschedule.
    pub fn handle_timer_tick(&self, cpu: CpuId) {
        kassert!(!self.thread_lock.held_by(cpu), "timer tick under the thread lock");
        let now = self.advance_clock(cpu);
        let expired = self.scheduler(cpu).expire(now);

        let mut state = self.thread_lock.lock(cpu);
        state.now = state.now.max(now);
        for timer in expired {
            state.expire_timer(timer);
        }
        state.class_tick(cpu);
        self.unlock(cpu, state);
    }

    /// Move runnable work from `victim` onto the idle CPU `cpu`
    pub fn steal(&self, cpu: CpuId, victim: CpuId) -> Option<Arc<Thread>> {
        let mut state = self.thread_lock.lock(cpu);
        let thread = state
            .steal(cpu, victim)
            .map(|index| state.threads.record(index).thread.clone());
        self.unlock(cpu, state);
        thread
    }

    /// Make a sleeping thread runnable
    ///
    /// Unblocking a thread that is already on a queue is fatal.
    pub fn unblock(&self, cpu: CpuId, thread: &Thread) {
        let mut state = self.thread_lock.lock(cpu);
        state.unblock(thread.index());
        self.unlock(cpu, state);
    }

    /// Current non-idle thread of `cpu`
    pub fn current_thread(&self, cpu: CpuId) -> Option<Arc<Thread>> {
        let state = self.thread_lock.lock(cpu);
        state
            .current(cpu)
            .map(|index| state.threads.record(index).thread.clone())
    }

    pub fn is_current(&self, cpu: CpuId, thread: &Thread) -> bool {
        let state = self.thread_lock.lock(cpu);
        state.current(cpu) == Some(thread.index())
    }

    /// Scheduling state of `thread`; `Unused` once it has been reaped
    pub fn thread_state(&self, thread: &Thread) -> ThreadState {
        let state = self.lock_state();
        state
            .threads
            .get(thread.index())
            .map_or(ThreadState::Unused, |record| record.state)
    }

    /// Queue `thread` is linked on
    pub fn queue_link(&self, thread: &Thread) -> QueueLink {
        let state = self.lock_state();
        state
            .threads
            .get(thread.index())
            .map_or(QueueLink::None, |record| record.link)
    }

    /// Collect the result of a blocking operation that finished after the
    /// thread slept
    pub fn take_return(&self, thread: &Thread) -> Option<Result<()>> {
        let mut state = self.lock_state();
        state.threads.get_mut(thread.index())?.ret.take()
    }

    pub fn need_reschedule(&self, cpu: CpuId) -> bool {
        self.thread_lock.lock(cpu).cpu(cpu).need_reschedule
    }

    /// Runnable threads of `cpu` in pick order
    pub fn run_queue(&self, cpu: CpuId) -> Vec<Arc<Thread>> {
        let state = self.thread_lock.lock(cpu);
        state
            .run_queue(cpu)
            .into_iter()
            .map(|index| state.threads.record(index).thread.clone())
            .collect()
    }

    /// Threads waiting on `cpu`'s zombie queue
    pub fn zombie_count(&self, cpu: CpuId) -> usize {
        self.thread_lock.lock(cpu).cpu(cpu).class.zombie_count()
    }

    pub fn sched_stats(&self, cpu: CpuId) -> SchedulerStats {
        self.thread_lock.lock(cpu).cpu(cpu).stats
    }

    /// Armed timers on `cpu`
    pub fn pending_timers(&self, cpu: CpuId) -> usize {
        self.scheduler(cpu).pending_timers()
    }
}
