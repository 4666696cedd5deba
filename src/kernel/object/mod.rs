// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Objects
//!
//! Jobs, processes and threads are kernel objects: each carries a
//! [`KernelObjectBase`] with a koid that is unique for the life of the kernel
//! and is reached from user space only through a handle.
//!
//! # Design
//!
//! - **Koids**: Allocated from one monotonic counter, never reused
//! - **Shared ownership**: Objects live in `Arc`s; the last handle or
//!   container reference to drop destroys the object
//! - **Typed lookup**: [`KernelObject`] is the type-erased form stored in
//!   handle tables and [`Dispatcher`] recovers the concrete type
//!
//! # Modules
//!
//! - [`handle`] - Handle and rights model
//! - [`job`] - Job objects and policy

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::kernel::process::Process;
use crate::kernel::thread::Thread;
use crate::log_trace;
use crate::rustux::types::Koid;

pub mod handle;
pub mod job;

pub use handle::{HandleEntry, HandleTable, HandleValue, Rights};
pub use job::{Job, JobPolicy, JobStatus, PolicyAction, PolicyCondition};

/// Maximum length of a process or thread name
pub const OBJECT_NAME_MAX: usize = 32;

/// Next koid to hand out; 0 is never assigned
static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

/// Objects currently alive
static LIVE_OBJECTS: AtomicUsize = AtomicUsize::new(0);

/// Allocate a fresh koid
pub fn alloc_koid() -> Koid {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

/// Number of kernel objects not yet destroyed
pub fn live_objects() -> usize {
    LIVE_OBJECTS.load(Ordering::Relaxed)
}

/// Copy `name`, cut at `max` bytes on a character boundary
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return String::from(name);
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// ============================================================================
/// Kernel Object Types
/// ============================================================================

/// Kernel object type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Process object
    Process = 1,

    /// Thread object
    Thread = 2,

    /// Job object
    Job = 9,
}

impl ObjectType {
    /// Get name as string
    pub const fn name(self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Thread => "thread",
            Self::Job => "job",
        }
    }
}

/// ============================================================================
/// Kernel Object Base
/// ============================================================================

/// State every kernel object carries
#[derive(Debug)]
pub struct KernelObjectBase {
    koid: Koid,
    obj_type: ObjectType,
    name: String,
}

impl KernelObjectBase {
    pub fn new(obj_type: ObjectType, name: &str, name_max: usize) -> Self {
        LIVE_OBJECTS.fetch_add(1, Ordering::Relaxed);
        Self {
            koid: alloc_koid(),
            obj_type,
            name: truncate_name(name, name_max),
        }
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn obj_type(&self) -> ObjectType {
        self.obj_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for KernelObjectBase {
    fn drop(&mut self) {
        LIVE_OBJECTS.fetch_sub(1, Ordering::Relaxed);
        log_trace!("{} {} destroyed", self.obj_type.name(), self.koid);
    }
}

/// ============================================================================
/// Type-Erased Objects
/// ============================================================================

/// A reference to any kernel object
#[derive(Clone)]
pub enum KernelObject {
    Job(Arc<Job>),
    Process(Arc<Process>),
    Thread(Arc<Thread>),
}

impl KernelObject {
    pub fn base(&self) -> &KernelObjectBase {
        match self {
            KernelObject::Job(job) => job.base(),
            KernelObject::Process(process) => process.base(),
            KernelObject::Thread(thread) => thread.base(),
        }
    }

    pub fn obj_type(&self) -> ObjectType {
        self.base().obj_type()
    }

    pub fn koid(&self) -> Koid {
        self.base().koid()
    }
}

/// Concrete kernel object types reachable through handles
pub trait Dispatcher: Sized {
    const TYPE: ObjectType;

    fn base(&self) -> &KernelObjectBase;

    /// Recover the concrete object, or `None` if `object` is another type
    fn downcast(object: &KernelObject) -> Option<Arc<Self>>;

    fn into_object(self: Arc<Self>) -> KernelObject;

    fn koid(&self) -> Koid {
        self.base().koid()
    }
}

impl Dispatcher for Job {
    const TYPE: ObjectType = ObjectType::Job;

    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn downcast(object: &KernelObject) -> Option<Arc<Self>> {
        match object {
            KernelObject::Job(job) => Some(job.clone()),
            _ => None,
        }
    }

    fn into_object(self: Arc<Self>) -> KernelObject {
        KernelObject::Job(self)
    }
}

impl Dispatcher for Process {
    const TYPE: ObjectType = ObjectType::Process;

    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn downcast(object: &KernelObject) -> Option<Arc<Self>> {
        match object {
            KernelObject::Process(process) => Some(process.clone()),
            _ => None,
        }
    }

    fn into_object(self: Arc<Self>) -> KernelObject {
        KernelObject::Process(self)
    }
}

impl Dispatcher for Thread {
    const TYPE: ObjectType = ObjectType::Thread;

    fn base(&self) -> &KernelObjectBase {
        &self.base
    }

    fn downcast(object: &KernelObject) -> Option<Arc<Self>> {
        match object {
            KernelObject::Thread(thread) => Some(thread.clone()),
            _ => None,
        }
    }

    fn into_object(self: Arc<Self>) -> KernelObject {
        KernelObject::Thread(self)
    }
}
