// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Global Thread Lock
//!
//! One spinlock governs every thread state transition, every run queue,
//! every wait queue and the job/process/thread tree. The data it protects is
//! only reachable through the guard, so holding a `&mut` to the scheduler
//! state is the proof that the lock is held.
//!
//! The lock remembers which CPU took it. The per-core timer lock must never
//! be acquired while the governing lock is held by the same CPU, and
//! [`ThreadLock::held_by`] is what that rule is checked against.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

use crate::rustux::types::CpuId;

const NO_OWNER: u32 = u32::MAX;

/// The governing lock
pub struct ThreadLock<T> {
    inner: Mutex<T>,
    owner: AtomicU32,
}

impl<T> ThreadLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
            owner: AtomicU32::new(NO_OWNER),
        }
    }

    /// Acquire the lock on behalf of `cpu`
    pub fn lock(&self, cpu: CpuId) -> ThreadLockGuard<'_, T> {
        let guard = self.inner.lock();
        self.owner.store(cpu, Ordering::Release);
        ThreadLockGuard {
            guard,
            owner: &self.owner,
        }
    }

    /// Whether `cpu` currently holds the lock
    pub fn held_by(&self, cpu: CpuId) -> bool {
        self.inner.is_locked() && self.owner.load(Ordering::Acquire) == cpu
    }
}

/// Evidence that the governing lock is held
pub struct ThreadLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    owner: &'a AtomicU32,
}

impl<T> Deref for ThreadLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ThreadLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for ThreadLockGuard<'_, T> {
    fn drop(&mut self) {
        // Cleared before the inner guard releases the mutex.
        self.owner.store(NO_OWNER, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_tracking() {
        let lock = ThreadLock::new(5u32);
        assert!(!lock.held_by(0));
        {
            let mut guard = lock.lock(1);
            *guard += 1;
            assert!(lock.held_by(1));
            assert!(!lock.held_by(0));
        }
        assert!(!lock.held_by(1));
        assert_eq!(*lock.lock(0), 6);
    }
}
