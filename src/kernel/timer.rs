// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Timer Management
//!
//! Time is counted in scheduler ticks. The boot CPU advances the clock on
//! every timer interrupt; every CPU then expires the entries of its own
//! timer list.
//!
//! # Design
//!
//! - **Absolute deadlines**: A [`Deadline`] is a tick number, or infinite
//! - **Sorted per-CPU list**: [`TimerList`] keeps entries ordered by expiry
//! - **One entry per thread**: Arming replaces the owner's previous entry,
//!   and a sleep that ends early queues a [`TimerOp::Disarm`] for its entry
//! - **Sequenced**: An entry carries the wait sequence number of the sleep
//!   that armed it, so a late disarm or expiry never touches a newer sleep
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::Deadline;
//!
//! let deadline = Deadline::after(10, 5);
//! assert!(!deadline.expired(14));
//! assert!(deadline.expired(15));
//! assert!(!Deadline::INFINITE.expired(u64::MAX));
//! ```

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::kernel::thread::ThreadIndex;
use crate::rustux::types::Tick;

/// ============================================================================
/// Deadline
/// ============================================================================

/// Absolute point in time a blocking operation gives up at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline(Tick);

impl Deadline {
    /// Never expires
    pub const INFINITE: Self = Self(Tick::MAX);

    /// Deadline at an absolute tick
    pub const fn at(tick: Tick) -> Self {
        Self(tick)
    }

    /// Deadline `ticks` after `now`
    pub const fn after(now: Tick, ticks: Tick) -> Self {
        Self(now.saturating_add(ticks))
    }

    /// Decode the syscall encoding, where `u64::MAX` means infinite
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn tick(self) -> Tick {
        self.0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == Tick::MAX
    }

    /// Whether the deadline has passed at `now`
    pub const fn expired(self, now: Tick) -> bool {
        !self.is_infinite() && now >= self.0
    }
}

/// ============================================================================
/// Scheduler Timers
/// ============================================================================

/// One armed timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTimer {
    /// Tick at which the owner is woken with a timeout
    pub expires: Tick,

    /// Sleeping thread
    pub owner: ThreadIndex,

    /// Wait sequence number of the sleep that armed this entry
    pub wait_seq: u64,
}

/// Timer list change queued under the thread lock and applied once it is
/// dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Arm(SchedulerTimer),
    Disarm { owner: ThreadIndex, wait_seq: u64 },
}

/// Per-CPU list of armed timeouts, sorted by expiry
#[derive(Debug, Default)]
pub struct TimerList {
    timers: VecDeque<SchedulerTimer>,
}

impl TimerList {
    pub const fn new() -> Self {
        Self {
            timers: VecDeque::new(),
        }
    }

    /// Insert an entry, after any entry with the same expiry
    ///
    /// An older entry of the same owner is dropped.
    pub fn insert(&mut self, timer: SchedulerTimer) {
        self.timers
            .retain(|t| t.owner != timer.owner || t.wait_seq > timer.wait_seq);
        if self.timers.iter().any(|t| t.owner == timer.owner) {
            return;
        }
        let pos = self.timers.partition_point(|t| t.expires <= timer.expires);
        self.timers.insert(pos, timer);
    }

    /// Drop the entry armed by sleep `wait_seq` of `owner`
    pub fn cancel(&mut self, owner: ThreadIndex, wait_seq: u64) -> bool {
        match self
            .timers
            .iter()
            .position(|t| t.owner == owner && t.wait_seq == wait_seq)
        {
            Some(pos) => {
                self.timers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Apply a queued change
    pub fn apply(&mut self, op: TimerOp) {
        match op {
            TimerOp::Arm(timer) => self.insert(timer),
            TimerOp::Disarm { owner, wait_seq } => {
                self.cancel(owner, wait_seq);
            }
        }
    }

    /// Remove and return every entry expiring at or before `now`
    pub fn pop_expired(&mut self, now: Tick) -> Vec<SchedulerTimer> {
        let count = self.timers.partition_point(|t| t.expires <= now);
        self.timers.drain(..count).collect()
    }

    /// Earliest pending expiry
    pub fn next_expiry(&self) -> Option<Tick> {
        self.timers.front().map(|t| t.expires)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(expires: Tick, slot: u32) -> SchedulerTimer {
        timer_seq(expires, slot, 1)
    }

    fn timer_seq(expires: Tick, slot: u32, wait_seq: u64) -> SchedulerTimer {
        SchedulerTimer {
            expires,
            owner: ThreadIndex::new(slot, 0),
            wait_seq,
        }
    }

    #[test]
    fn test_deadline_saturates() {
        assert_eq!(Deadline::after(Tick::MAX - 1, 10), Deadline::INFINITE);
        assert!(Deadline::at(0).expired(0));
    }

    #[test]
    fn test_timer_list_sorted() {
        let mut list = TimerList::new();
        list.insert(timer(30, 1));
        list.insert(timer(10, 2));
        list.insert(timer(20, 3));
        list.insert(timer(10, 4));
        assert_eq!(list.next_expiry(), Some(10));

        let expired = list.pop_expired(10);
        let owners: Vec<u32> = expired.iter().map(|t| t.owner.slot()).collect();
        assert_eq!(owners, [2, 4]);
        assert_eq!(list.len(), 2);

        assert!(list.pop_expired(19).is_empty());
        assert_eq!(list.pop_expired(100).len(), 2);
        assert!(list.is_empty());
    }

    #[test]
    fn test_rearm_replaces_entry() {
        let mut list = TimerList::new();
        list.insert(timer_seq(1_000, 1, 1));
        list.insert(timer_seq(2_000, 1, 2));
        list.insert(timer_seq(50, 2, 1));
        assert_eq!(list.len(), 2);

        // A late arm of an older sleep loses to the newer one
        list.insert(timer_seq(10, 1, 1));
        assert_eq!(list.len(), 2);
        assert_eq!(list.next_expiry(), Some(50));
    }

    #[test]
    fn test_disarm_matches_sleep() {
        let mut list = TimerList::new();
        list.apply(TimerOp::Arm(timer_seq(100, 1, 3)));
        list.apply(TimerOp::Disarm {
            owner: ThreadIndex::new(1, 0),
            wait_seq: 2,
        });
        assert_eq!(list.len(), 1);
        list.apply(TimerOp::Disarm {
            owner: ThreadIndex::new(1, 0),
            wait_seq: 3,
        });
        assert!(list.is_empty());
    }
}
