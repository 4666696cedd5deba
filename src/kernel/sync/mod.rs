// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Synchronization Primitives
//!
//! Blocking primitives built on the scheduler. Both operate on state guarded
//! by the governing thread lock, so their operations are methods on the
//! locked scheduler state rather than on the primitive itself.
//!
//! # Primitives
//!
//! - **Wait Queue**: FIFO of sleeping threads with deadline and interrupt
//!   support
//! - **Semaphore**: Counting semaphore layered on a wait queue
//!
//! A thread that has to sleep gets [`Poll::Pending`](core::task::Poll) back;
//! the operation that called the primitive records how to continue and the
//! scheduler switches away.

pub mod semaphore;
pub mod wait_queue;

pub use semaphore::Semaphore;
pub use wait_queue::{WaitQueue, WaitQueueId, WaitQueueKind};
