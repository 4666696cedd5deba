// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wait Queue
//!
//! Threads waiting for a condition sleep on a wait queue until another thread
//! wakes them, their deadline passes or they are interrupted.
//!
//! # Design
//!
//! - **FIFO**: Waiters are woken in the order they blocked
//! - **Owned by IPC state**: Every queue belongs to a thread's IPC state and
//!   is named by a [`WaitQueueId`] (owning thread plus which queue)
//! - **Wake result**: A woken thread carries the status it was woken with;
//!   blocking operations continue from it when the thread runs again
//! - **Deadlines**: A finite deadline arms a scheduler timer once the
//!   governing lock is dropped; an already expired one fails immediately

use alloc::collections::VecDeque;
use core::task::Poll;

use crate::kernel::sched::SchedState;
use crate::kernel::thread::{Interruptible, QueueLink, ThreadIndex, ThreadState};
use crate::kernel::timer::{Deadline, SchedulerTimer, TimerOp};
use crate::rustux::errors::{Error, Result};
use crate::{kassert, kernel_panic, log_trace};

/// Magic number for wait queue validation
const WAIT_QUEUE_MAGIC: u32 = 0x57414954; // "WAIT" in hex

/// Which of a thread's queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitQueueKind {
    /// Threads waiting to send to the owner
    Senders,

    /// Threads waiting to receive from the owner
    Receivers,

    /// Waiters on the owner's "register file empty" semaphore
    Empty,

    /// Waiters on the owner's "register file full" semaphore
    Full,
}

/// Name of one wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitQueueId {
    pub owner: ThreadIndex,
    pub kind: WaitQueueKind,
}

impl WaitQueueId {
    pub const fn new(owner: ThreadIndex, kind: WaitQueueKind) -> Self {
        Self { owner, kind }
    }
}

/// ============================================================================
/// Wait Queue
/// ============================================================================

/// FIFO of sleeping threads
#[derive(Debug)]
pub struct WaitQueue {
    waiters: VecDeque<ThreadIndex>,
    magic: u32,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            magic: WAIT_QUEUE_MAGIC,
        }
    }

    fn validate(&self) {
        kassert!(self.magic == WAIT_QUEUE_MAGIC, "wait queue magic {:#x} corrupted", self.magic);
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub fn contains(&self, thread: ThreadIndex) -> bool {
        self.waiters.contains(&thread)
    }

    /// Waiters in wake order
    pub fn iter(&self) -> impl Iterator<Item = ThreadIndex> + '_ {
        self.waiters.iter().copied()
    }

    fn push_back(&mut self, thread: ThreadIndex) {
        self.validate();
        kassert!(!self.contains(thread), "thread {:?} already waiting", thread);
        self.waiters.push_back(thread);
    }

    fn pop_front(&mut self) -> Option<ThreadIndex> {
        self.validate();
        self.waiters.pop_front()
    }

    fn remove(&mut self, thread: ThreadIndex) -> bool {
        self.validate();
        match self.waiters.iter().position(|&t| t == thread) {
            Some(pos) => {
                self.waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    fn take_all(&mut self) -> VecDeque<ThreadIndex> {
        self.validate();
        core::mem::take(&mut self.waiters)
    }
}

/// ============================================================================
/// Blocking and Waking
/// ============================================================================

impl SchedState {
    /// Resolve a queue name to the queue
    pub(crate) fn wait_queue_mut(&mut self, id: WaitQueueId) -> &mut WaitQueue {
        let ipc = &mut self.threads.record_mut(id.owner).ipc;
        match id.kind {
            WaitQueueKind::Senders => &mut ipc.sender_wait_queue,
            WaitQueueKind::Receivers => &mut ipc.receiver_wait_queue,
            WaitQueueKind::Empty => ipc.e.waiters_mut(),
            WaitQueueKind::Full => ipc.f.waiters_mut(),
        }
    }

    pub(crate) fn wait_queue(&self, id: WaitQueueId) -> &WaitQueue {
        let ipc = &self.threads.record(id.owner).ipc;
        match id.kind {
            WaitQueueKind::Senders => &ipc.sender_wait_queue,
            WaitQueueKind::Receivers => &ipc.receiver_wait_queue,
            WaitQueueKind::Empty => ipc.e.waiters(),
            WaitQueueKind::Full => ipc.f.waiters(),
        }
    }

    /// Put the running thread `cur` to sleep on `queue`
    ///
    /// Returns `Pending` once the thread sleeps; the caller records how to
    /// continue and switches away. A deadline that has already passed fails
    /// with `TimedOut` without sleeping.
    pub fn block(
        &mut self,
        cur: ThreadIndex,
        queue: WaitQueueId,
        interruptible: Interruptible,
        deadline: Deadline,
    ) -> Poll<Result<()>> {
        if deadline.expired(self.now) {
            return Poll::Ready(Err(Error::TimedOut));
        }

        let record = self.threads.record_mut(cur);
        kassert!(
            record.state == ThreadState::Running,
            "blocking thread {:?} is {}",
            cur,
            record.state.name()
        );
        kassert!(record.link == QueueLink::None, "blocking thread {:?} still on {:?}", cur, record.link);

        record.state = ThreadState::Sleeping;
        record.link = QueueLink::Wait(queue);
        record.wait_seq += 1;
        record.interruptible = interruptible;
        record.wake_result = None;
        record.deadline = (!deadline.is_infinite()).then_some(deadline);
        let (cpu, wait_seq) = (record.cpu, record.wait_seq);

        self.wait_queue_mut(queue).push_back(cur);
        if !deadline.is_infinite() {
            self.timer_ops.push((
                cpu,
                TimerOp::Arm(SchedulerTimer {
                    expires: deadline.tick(),
                    owner: cur,
                    wait_seq,
                }),
            ));
        }
        log_trace!("{:?} blocked on {:?} until {:?}", cur, queue, deadline);
        Poll::Pending
    }

    /// Wake the oldest waiter on `queue`
    pub fn wake_one(&mut self, queue: WaitQueueId, result: Result<()>) -> bool {
        match self.wait_queue_mut(queue).pop_front() {
            Some(thread) => {
                self.release(thread, result);
                true
            }
            None => false,
        }
    }

    /// Wake every waiter on `queue`, in FIFO order
    ///
    /// An empty queue is a no-op.
    pub fn wake_all(&mut self, queue: WaitQueueId, result: Result<()>) -> usize {
        let waiters = self.wait_queue_mut(queue).take_all();
        let count = waiters.len();
        for thread in waiters {
            self.release(thread, result);
        }
        count
    }

    /// Wake one sleeping thread wherever it waits
    pub fn wake_thread(&mut self, thread: ThreadIndex, result: Result<()>) -> bool {
        let link = match self.threads.get(thread) {
            Some(record) if record.state == ThreadState::Sleeping => record.link,
            _ => return false,
        };
        if let QueueLink::Wait(queue) = link {
            let removed = self.wait_queue_mut(queue).remove(thread);
            kassert!(removed, "{:?} missing from {:?}", thread, queue);
        }
        self.release(thread, result);
        true
    }

    /// Cut an interruptible sleep short with `Interrupted`
    pub fn interrupt(&mut self, thread: ThreadIndex) -> bool {
        match self.threads.get(thread) {
            Some(record)
                if record.state == ThreadState::Sleeping && record.interruptible == Interruptible::Yes =>
            {
                self.wake_thread(thread, Err(Error::Interrupted))
            }
            _ => false,
        }
    }

    /// Fire an expired scheduler timer
    ///
    /// Entries left behind by sleeps that already ended are ignored.
    pub fn expire_timer(&mut self, timer: SchedulerTimer) -> bool {
        let current = match self.threads.get(timer.owner) {
            Some(record) => {
                record.state == ThreadState::Sleeping
                    && record.wait_seq == timer.wait_seq
                    && record.deadline.is_some()
            }
            None => false,
        };
        if !current {
            return false;
        }
        // Already off the timer list
        self.threads.record_mut(timer.owner).deadline = None;
        log_trace!("{:?} timed out at {}", timer.owner, timer.expires);
        self.wake_thread(timer.owner, Err(Error::TimedOut))
    }

    /// Take a sleeping thread off its wait queue without waking it
    pub(crate) fn unlink_waiter(&mut self, thread: ThreadIndex) {
        let link = self.threads.record(thread).link;
        if let QueueLink::Wait(queue) = link {
            let removed = self.wait_queue_mut(queue).remove(thread);
            kassert!(removed, "{:?} missing from {:?}", thread, queue);
        }
        self.disarm(thread);
        let record = self.threads.record_mut(thread);
        record.link = QueueLink::None;
        record.wake_result = None;
    }

    /// Queue removal of the timer armed by the current sleep of `thread`
    fn disarm(&mut self, thread: ThreadIndex) {
        let record = self.threads.record_mut(thread);
        if record.deadline.take().is_some() {
            let op = TimerOp::Disarm {
                owner: thread,
                wait_seq: record.wait_seq,
            };
            let cpu = record.cpu;
            self.timer_ops.push((cpu, op));
        }
    }

    fn release(&mut self, thread: ThreadIndex, result: Result<()>) {
        match self.threads.record(thread).link {
            QueueLink::Wait(_) => {}
            other => kernel_panic!("waking {:?} linked on {:?}", thread, other),
        }
        self.disarm(thread);
        let record = self.threads.record_mut(thread);
        record.link = QueueLink::None;
        record.wake_result = Some(result);
        self.unblock(thread);
    }
}
