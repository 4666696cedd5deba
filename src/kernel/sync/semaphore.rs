// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting Semaphore
//!
//! `wait` takes a unit if one is available and otherwise sleeps on the
//! semaphore's wait queue; a woken waiter retries, so it only proceeds once
//! it has actually taken a unit. `signal` adds a unit and wakes one waiter.

use core::task::Poll;

use crate::kernel::sched::SchedState;
use crate::kernel::sync::wait_queue::{WaitQueue, WaitQueueId, WaitQueueKind};
use crate::kernel::thread::{Interruptible, ThreadIndex};
use crate::kernel::timer::Deadline;
use crate::kernel_panic;
use crate::rustux::errors::Result;

/// Counting semaphore
#[derive(Debug)]
pub struct Semaphore {
    count: u64,
    waiters: WaitQueue,
}

impl Semaphore {
    pub const fn new(count: u64) -> Self {
        Self {
            count,
            waiters: WaitQueue::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn waiters(&self) -> &WaitQueue {
        &self.waiters
    }

    pub(crate) fn waiters_mut(&mut self) -> &mut WaitQueue {
        &mut self.waiters
    }

    fn try_acquire(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }
}

impl SchedState {
    fn semaphore_mut(&mut self, id: WaitQueueId) -> &mut Semaphore {
        let ipc = &mut self.threads.record_mut(id.owner).ipc;
        match id.kind {
            WaitQueueKind::Empty => &mut ipc.e,
            WaitQueueKind::Full => &mut ipc.f,
            kind => kernel_panic!("{:?} queue is not a semaphore", kind),
        }
    }

    /// Take one unit of `sem` for `cur`, sleeping until one is available
    pub fn sem_wait(&mut self, cur: ThreadIndex, sem: WaitQueueId, deadline: Deadline) -> Poll<Result<()>> {
        if self.semaphore_mut(sem).try_acquire() {
            return Poll::Ready(Ok(()));
        }
        self.block(cur, sem, Interruptible::No, deadline)
    }

    /// Add one unit to `sem` and wake its oldest waiter
    pub fn sem_signal(&mut self, sem: WaitQueueId) {
        self.semaphore_mut(sem).count += 1;
        self.wake_one(sem, Ok(()));
    }
}
