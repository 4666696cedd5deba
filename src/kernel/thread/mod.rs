// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Management
//!
//! A thread has two halves. The [`Thread`] kernel object is what handles
//! refer to: it holds the koid, the owning process and the message register
//! file behind the IPC state's own lock. The [`ThreadRecord`] holds every
//! field the governing thread lock protects (scheduling state, queue
//! membership, the IPC protocol state and any suspended operation) and lives
//! in the [`ThreadArena`].
//!
//! # Design
//!
//! - **Arena indices**: Queues and timers name threads by [`ThreadIndex`],
//!   a slot number plus a generation so a reaped and reused slot is never
//!   mistaken for the thread that used to live there
//! - **Single queue membership**: [`QueueLink`] records which run, zombie or
//!   wait queue a thread sits on; it can be on at most one
//! - **Lifecycle**: `EMBRYO -> RUNNABLE <-> RUNNING`, `RUNNING -> SLEEPING ->
//!   RUNNABLE`, any live state `-> DYING -> UNUSED`

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;

use spin::{Mutex, MutexGuard};

use crate::kernel::ipc::{IpcState, MessageRegisters, PendingOp};
use crate::kernel::object::{KernelObjectBase, ObjectType, OBJECT_NAME_MAX};
use crate::kernel::process::Process;
use crate::kernel::sync::WaitQueueId;
use crate::kernel::timer::Deadline;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{CpuId, Koid};
use crate::{kernel_panic, log_trace};

pub mod lifecycle;

/// ============================================================================
/// Thread State
/// ============================================================================

/// Thread state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot is free
    Unused = 0,

    /// Created, not yet handed to the scheduler
    Embryo = 1,

    /// Blocked on a wait queue
    Sleeping = 2,

    /// On a run queue
    Runnable = 3,

    /// Current thread of some CPU
    Running = 4,

    /// Killed; waiting to be reaped from the zombie queue
    Dying = 5,
}

impl ThreadState {
    /// Check if thread is alive
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Embryo | Self::Sleeping | Self::Runnable | Self::Running)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Embryo => "embryo",
            Self::Sleeping => "sleeping",
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Dying => "dying",
        }
    }
}

/// Reference to a thread slot in the arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadIndex {
    slot: u32,
    generation: u32,
}

impl ThreadIndex {
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub const fn slot(self) -> u32 {
        self.slot
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ThreadIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}.{}", self.slot, self.generation)
    }
}

/// Which queue a thread is linked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLink {
    None,
    RunQueue(CpuId),
    ZombieQueue(CpuId),
    Wait(WaitQueueId),
}

/// Whether a sleep can be cut short by [`Kernel::interrupt`](crate::Kernel::interrupt)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruptible {
    No,
    Yes,
}

/// ============================================================================
/// Thread Object
/// ============================================================================

/// Thread kernel object
pub struct Thread {
    pub(crate) base: KernelObjectBase,
    index: ThreadIndex,
    process: Weak<Process>,
    regs: Mutex<MessageRegisters>,
}

impl Thread {
    pub(crate) fn new(index: ThreadIndex, name: &str, process: Weak<Process>) -> Self {
        Self {
            base: KernelObjectBase::new(ObjectType::Thread, name, OBJECT_NAME_MAX),
            index,
            process,
            regs: Mutex::new(MessageRegisters::new()),
        }
    }

    pub fn koid(&self) -> Koid {
        self.base.koid()
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    pub fn index(&self) -> ThreadIndex {
        self.index
    }

    /// Owning process; `None` for idle threads and once the process is gone
    pub fn process(&self) -> Option<Arc<Process>> {
        self.process.upgrade()
    }

    /// Lock this thread's message and buffer registers
    pub fn regs(&self) -> MutexGuard<'_, MessageRegisters> {
        self.regs.lock()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("koid", &self.koid())
            .field("name", &self.name())
            .field("index", &self.index)
            .finish()
    }
}

/// ============================================================================
/// Thread Record
/// ============================================================================

/// Thread fields guarded by the governing thread lock
pub struct ThreadRecord {
    pub thread: Arc<Thread>,
    pub state: ThreadState,
    /// CPU whose queues the thread uses
    pub cpu: CpuId,
    pub link: QueueLink,
    pub idle: bool,
    pub ipc: IpcState,
    /// Bumped on every sleep; timer entries from older sleeps are stale
    pub wait_seq: u64,
    pub deadline: Option<Deadline>,
    pub interruptible: Interruptible,
    /// Why the last sleep ended
    pub wake_result: Option<Result<()>>,
    /// Blocking operation to continue when the thread next runs
    pub pending: Option<PendingOp>,
    /// Completed result of a blocking operation, awaiting pickup
    pub ret: Option<Result<()>>,
}

impl ThreadRecord {
    pub fn new(thread: Arc<Thread>, cpu: CpuId) -> Self {
        Self {
            thread,
            state: ThreadState::Embryo,
            cpu,
            link: QueueLink::None,
            idle: false,
            ipc: IpcState::new(),
            wait_seq: 0,
            deadline: None,
            interruptible: Interruptible::No,
            wake_result: None,
            pending: None,
            ret: None,
        }
    }
}

struct Slot {
    generation: u32,
    record: Option<ThreadRecord>,
}

/// Fixed-capacity table of thread records
pub struct ThreadArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    live: usize,
}

impl ThreadArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            live: 0,
        }
    }

    /// Allocate a slot and build its record from the assigned index
    pub fn insert(&mut self, build: impl FnOnce(ThreadIndex) -> ThreadRecord) -> Result<ThreadIndex> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.slots.len() < self.capacity => {
                self.slots.push(Slot {
                    generation: 0,
                    record: None,
                });
                (self.slots.len() - 1) as u32
            }
            None => return Err(Error::NoResources),
        };

        let entry = &mut self.slots[slot as usize];
        let index = ThreadIndex::new(slot, entry.generation);
        entry.record = Some(build(index));
        self.live += 1;
        log_trace!("thread slot {:?} allocated", index);
        Ok(index)
    }

    /// Free a slot, returning its record
    pub fn remove(&mut self, index: ThreadIndex) -> ThreadRecord {
        let entry = match self.slots.get_mut(index.slot as usize) {
            Some(entry) if entry.generation == index.generation && entry.record.is_some() => entry,
            _ => kernel_panic!("removing stale thread slot {:?}", index),
        };
        let record = match entry.record.take() {
            Some(record) => record,
            None => kernel_panic!("removing empty thread slot {:?}", index),
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot);
        self.live -= 1;
        record
    }

    pub fn get(&self, index: ThreadIndex) -> Option<&ThreadRecord> {
        self.slots
            .get(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.record.as_ref())
    }

    pub fn get_mut(&mut self, index: ThreadIndex) -> Option<&mut ThreadRecord> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.record.as_mut())
    }

    /// Record for an index the kernel itself holds; a stale one is a bug
    pub fn record(&self, index: ThreadIndex) -> &ThreadRecord {
        match self.get(index) {
            Some(record) => record,
            None => kernel_panic!("stale thread index {:?}", index),
        }
    }

    pub fn record_mut(&mut self, index: ThreadIndex) -> &mut ThreadRecord {
        match self.get_mut(index) {
            Some(record) => record,
            None => kernel_panic!("stale thread index {:?}", index),
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Short label for log lines
pub(crate) fn describe(thread: &Thread) -> String {
    alloc::format!("{}({})", thread.name(), thread.koid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: ThreadIndex) -> ThreadRecord {
        ThreadRecord::new(Arc::new(Thread::new(index, "t", Weak::new())), 0)
    }

    #[test]
    fn test_arena_capacity() {
        let mut arena = ThreadArena::new(2);
        arena.insert(record).unwrap();
        arena.insert(record).unwrap();
        assert_eq!(arena.insert(record).err(), Some(Error::NoResources));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_reused_slot_gets_new_generation() {
        let mut arena = ThreadArena::new(1);
        let first = arena.insert(record).unwrap();
        let removed = arena.remove(first);
        assert_eq!(removed.thread.index(), first);

        let second = arena.insert(record).unwrap();
        assert_eq!(first.slot(), second.slot());
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert!(arena.get(second).is_some());
    }

    #[test]
    fn test_new_record_defaults() {
        let mut arena = ThreadArena::new(4);
        let index = arena.insert(record).unwrap();
        let rec = arena.record(index);
        assert_eq!(rec.state, ThreadState::Embryo);
        assert_eq!(rec.link, QueueLink::None);
        assert!(rec.pending.is_none());
        assert!(rec.thread.process().is_none());
    }

    #[test]
    #[should_panic(expected = "stale thread index")]
    fn test_stale_index_is_fatal() {
        let mut arena = ThreadArena::new(1);
        let index = arena.insert(record).unwrap();
        arena.remove(index);
        arena.record(index);
    }
}
