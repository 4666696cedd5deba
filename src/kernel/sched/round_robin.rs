// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Round-Robin Scheduling Class
//!
//! One FIFO run queue and one zombie queue per CPU. Threads are picked from
//! the front; an idle CPU steals from the back of a busier one, and only
//! when that leaves the victim at least one thread. Dying threads never
//! reach the run queue: they are diverted to the zombie queue and reaped on
//! the next scheduler tick.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::kernel::thread::{QueueLink, ThreadIndex};
use crate::rustux::types::CpuId;

/// Per-CPU round-robin queues
#[derive(Debug)]
pub struct RoundRobin {
    cpu: CpuId,
    run_queue: VecDeque<ThreadIndex>,
    zombie_queue: VecDeque<ThreadIndex>,
}

impl RoundRobin {
    pub const fn new(cpu: CpuId) -> Self {
        Self {
            cpu,
            run_queue: VecDeque::new(),
            zombie_queue: VecDeque::new(),
        }
    }

    /// Append `thread`, to the zombie queue if it is dying
    ///
    /// Returns the link the thread now has.
    pub fn enqueue(&mut self, thread: ThreadIndex, dying: bool) -> QueueLink {
        if dying {
            self.zombie_queue.push_back(thread);
            QueueLink::ZombieQueue(self.cpu)
        } else {
            self.run_queue.push_back(thread);
            QueueLink::RunQueue(self.cpu)
        }
    }

    /// Remove `thread` from the run queue
    pub fn dequeue(&mut self, thread: ThreadIndex) -> bool {
        match self.run_queue.iter().position(|&t| t == thread) {
            Some(pos) => {
                self.run_queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Next thread to run
    pub fn fetch(&mut self) -> Option<ThreadIndex> {
        self.run_queue.pop_front()
    }

    /// Give the most recently queued thread to another CPU
    ///
    /// Refuses when that would leave this queue empty.
    pub fn steal(&mut self) -> Option<ThreadIndex> {
        if self.run_queue.len() > 1 {
            self.run_queue.pop_back()
        } else {
            None
        }
    }

    /// Empty the zombie queue
    pub fn take_zombies(&mut self) -> Vec<ThreadIndex> {
        self.zombie_queue.drain(..).collect()
    }

    /// Number of runnable threads
    pub fn workload_size(&self) -> usize {
        self.run_queue.len()
    }

    pub fn zombie_count(&self) -> usize {
        self.zombie_queue.len()
    }

    /// Runnable threads in the order they will run
    pub fn run_queue(&self) -> impl Iterator<Item = ThreadIndex> + '_ {
        self.run_queue.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(slot: u32) -> ThreadIndex {
        ThreadIndex::new(slot, 0)
    }

    #[test]
    fn test_fifo_fetch() {
        let mut rr = RoundRobin::new(0);
        assert_eq!(rr.enqueue(t(1), false), QueueLink::RunQueue(0));
        rr.enqueue(t(2), false);
        assert_eq!(rr.fetch(), Some(t(1)));
        assert_eq!(rr.fetch(), Some(t(2)));
        assert_eq!(rr.fetch(), None);
    }

    #[test]
    fn test_steal_takes_tail() {
        let mut rr = RoundRobin::new(0);
        for slot in 1..=3 {
            rr.enqueue(t(slot), false);
        }
        assert_eq!(rr.steal(), Some(t(3)));
        assert_eq!(rr.run_queue().collect::<Vec<_>>(), [t(1), t(2)]);
    }

    #[test]
    fn test_steal_leaves_last_thread() {
        let mut rr = RoundRobin::new(1);
        rr.enqueue(t(7), false);
        assert_eq!(rr.steal(), None);
        assert_eq!(rr.workload_size(), 1);
    }

    #[test]
    fn test_dying_goes_to_zombie_queue() {
        let mut rr = RoundRobin::new(2);
        assert_eq!(rr.enqueue(t(4), true), QueueLink::ZombieQueue(2));
        assert_eq!(rr.workload_size(), 0);
        assert_eq!(rr.fetch(), None);
        assert_eq!(rr.take_zombies(), [t(4)]);
        assert_eq!(rr.zombie_count(), 0);
    }

    #[test]
    fn test_dequeue() {
        let mut rr = RoundRobin::new(0);
        rr.enqueue(t(1), false);
        rr.enqueue(t(2), false);
        assert!(rr.dequeue(t(1)));
        assert!(!rr.dequeue(t(1)));
        assert_eq!(rr.fetch(), Some(t(2)));
    }
}
