// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scheduler scenarios across several threads and CPUs

use core::task::Poll;

use crate::kernel::sched::SchedState;
use crate::kernel::sync::{WaitQueueId, WaitQueueKind};
use crate::kernel::tests::fixture::Fixture;
use crate::kernel::thread::{QueueLink, ThreadIndex, ThreadState};
use crate::kernel::timer::Deadline;
use crate::rustux::errors::Error;
use crate::rustux::types::CpuId;

const KINDS: [WaitQueueKind; 4] = [
    WaitQueueKind::Senders,
    WaitQueueKind::Receivers,
    WaitQueueKind::Empty,
    WaitQueueKind::Full,
];

/// Every live thread sits on at most one queue, and that queue is the one
/// its link names
fn assert_single_membership(state: &SchedState, threads: &[ThreadIndex], cpus: CpuId) {
    let live: alloc::vec::Vec<ThreadIndex> = threads
        .iter()
        .copied()
        .filter(|&t| state.threads.get(t).is_some())
        .collect();

    for &t in &live {
        let mut places = 0;
        for cpu in 0..cpus {
            places += state.run_queue(cpu).iter().filter(|&&q| q == t).count();
        }
        for &owner in &live {
            for kind in KINDS {
                let queue = WaitQueueId::new(owner, kind);
                let found = state.wait_queue(queue).iter().filter(|&q| q == t).count();
                if found > 0 {
                    assert_eq!(state.threads.record(t).link, QueueLink::Wait(queue));
                }
                places += found;
            }
        }

        let record = state.threads.record(t);
        match record.link {
            QueueLink::None => assert_eq!(places, 0, "{:?} queued without a link", t),
            QueueLink::ZombieQueue(_) => {
                assert_eq!(places, 0);
                assert_eq!(record.state, ThreadState::Dying);
            }
            QueueLink::RunQueue(cpu) => {
                assert_eq!(places, 1);
                assert!(state.run_queue(cpu).contains(&t));
            }
            QueueLink::Wait(_) => {
                assert_eq!(places, 1);
                assert_eq!(record.state, ThreadState::Sleeping);
            }
        }
        if record.state == ThreadState::Sleeping {
            assert!(matches!(record.link, QueueLink::Wait(_)));
        }
    }
}

#[test]
fn test_steal_until_victim_keeps_one() {
    let fx = Fixture::with_cpus(2, 3);
    let [a, b, c] = fx.threads::<3>();
    let k = &fx.kernel;
    for t in [&a, &b, &c] {
        k.start_thread(t, 0).unwrap();
    }

    assert_eq!(k.steal(1, 0).map(|t| t.koid()), Some(c.koid()));
    assert_eq!(k.steal(1, 0).map(|t| t.koid()), Some(b.koid()));
    assert!(k.steal(1, 0).is_none());
    assert!(k.steal(0, 0).is_none());

    let on_1: alloc::vec::Vec<_> = k.run_queue(1).iter().map(|t| t.koid()).collect();
    assert_eq!(on_1, [c.koid(), b.koid()]);
    assert_eq!(k.queue_link(&a), QueueLink::RunQueue(0));
}

#[test]
fn test_queue_membership_through_block_wake_and_kill() {
    let fx = Fixture::started(4);
    let [a, b, c, d] = fx.threads::<4>();
    let all = fx.indices::<4>();
    let k = &fx.kernel;
    let check = || assert_single_membership(&k.lock_state(), &all, 1);

    k.reschedule(0);
    check();

    // a waits to send to b, b waits for c to send
    assert!(k.ipc_send(0, &b, Deadline::INFINITE).is_blocked());
    check();
    assert!(k.is_current(0, &b));
    assert!(k.ipc_receive(0, &c, Deadline::INFINITE).is_blocked());
    check();
    assert_eq!(k.queue_link(&a), QueueLink::Wait(WaitQueueId::new(b.index(), WaitQueueKind::Senders)));
    assert_eq!(k.queue_link(&b), QueueLink::Wait(WaitQueueId::new(c.index(), WaitQueueKind::Receivers)));

    assert!(k.is_current(0, &c));
    k.yield_cpu(0);
    assert!(k.is_current(0, &d));
    check();

    assert!(k.kill_thread(0, &d));
    assert_eq!(k.thread_state(&d), ThreadState::Dying);
    assert!(!k.kill_thread(0, &d));
    k.yield_cpu(0);
    check();
    assert_eq!(k.queue_link(&d), QueueLink::ZombieQueue(0));
    assert_eq!(k.zombie_count(0), 1);
    assert!(k.is_current(0, &c));

    k.handle_timer_tick(0);
    check();
    assert_eq!(k.thread_state(&d), ThreadState::Unused);
    assert_eq!(k.zombie_count(0), 0);
    assert_eq!(k.sched_stats(0).reaped, 1);
}

#[test]
fn test_timed_semaphore_wait_expires_on_tick() {
    let fx = Fixture::new(2);
    let [a, owner] = fx.indices::<2>();
    let full = WaitQueueId::new(owner, WaitQueueKind::Full);

    let mut state = fx.kernel.lock_state();
    state.make_current(0, a);
    assert!(state.sem_wait(a, full, Deadline::at(2)).is_pending());
    fx.kernel.unlock(0, state);
    assert_eq!(fx.kernel.pending_timers(0), 1);

    fx.kernel.handle_timer_tick(0);
    assert_eq!(fx.kernel.lock_state().threads.record(a).state, ThreadState::Sleeping);
    fx.kernel.handle_timer_tick(0);

    let state = fx.kernel.lock_state();
    let record = state.threads.record(a);
    assert_eq!(record.state, ThreadState::Runnable);
    assert_eq!(record.wake_result, Some(Err(Error::TimedOut)));
    assert!(state.wait_queue(full).is_empty());
    assert_eq!(state.threads.record(owner).ipc.f.count(), 0);
}

#[test]
fn test_signal_before_wait_is_kept() {
    let fx = Fixture::new(2);
    let [a, owner] = fx.indices::<2>();
    let full = WaitQueueId::new(owner, WaitQueueKind::Full);
    let mut state = fx.kernel.lock_state();

    state.sem_signal(full);
    state.make_current(0, a);
    assert_eq!(state.sem_wait(a, full, Deadline::INFINITE), Poll::Ready(Ok(())));
    assert_eq!(state.threads.record(owner).ipc.f.count(), 0);
}

#[test]
fn test_only_boot_cpu_advances_clock() {
    let fx = Fixture::with_cpus(2, 2);
    let [a, b] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&a, 0).unwrap();
    k.start_thread(&b, 1).unwrap();
    k.reschedule(0);
    k.reschedule(1);
    assert!(k.is_current(0, &a));
    assert!(k.is_current(1, &b));

    k.handle_timer_tick(1);
    assert_eq!(k.current_tick(), 0);
    assert!(k.need_reschedule(1));
    assert!(!k.need_reschedule(0));

    k.handle_timer_tick(0);
    assert_eq!(k.current_tick(), 1);
}

#[test]
#[should_panic(expected = "already enqueued")]
fn test_unblock_of_woken_thread_is_fatal() {
    let fx = Fixture::started(2);
    let [a, b] = fx.threads::<2>();
    let k = &fx.kernel;
    k.reschedule(0);
    assert!(k.ipc_send(0, &b, Deadline::INFINITE).is_blocked());

    assert!(k.interrupt(0, &a));
    assert_eq!(k.queue_link(&a), QueueLink::RunQueue(0));
    k.unblock(0, &a);
}
