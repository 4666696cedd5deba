// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! IPC scenarios driven through the kernel entry points

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::kernel::init::KernelConfig;
use crate::kernel::ipc::{Acceptor, Fpage, IpcStatus, MessageItem, MessageTag, PageRights};
use crate::kernel::object::handle::Rights;
use crate::kernel::object::job::{PolicyAction, PolicyCondition, PolicyItem, PolicyMode};
use crate::kernel::sched::Syscall;
use crate::kernel::sync::{WaitQueueId, WaitQueueKind};
use crate::kernel::syscalls::{SyscallArgs, SyscallNumber};
use crate::kernel::tests::fixture::Fixture;
use crate::kernel::thread::{Thread, ThreadState};
use crate::kernel::timer::Deadline;
use crate::kernel::vm::{AddressSpace, Region, SoftAspace, PAGE_SIZE};
use crate::kernel::Kernel;
use crate::rustux::errors::Error;
use crate::rustux::types::Word;

const SEND_BASE: usize = 0x10_0000;
const WINDOW_BASE: usize = 0x40_0000;

fn set_message(kernel: &Kernel, thread: &Thread, words: &[Word]) {
    kernel.ipc_set_mr(thread, 0, MessageTag::new(0, words.len(), 0).raw()).unwrap();
    for (i, &word) in words.iter().enumerate() {
        kernel.ipc_set_mr(thread, i + 1, word).unwrap();
    }
}

fn set_items(thread: &Thread, items: &[MessageItem]) {
    let words: Vec<Word> = items.iter().flat_map(|item| item.typed_words().unwrap()).collect();
    let mut regs = thread.regs();
    regs.set_message_tag(MessageTag::new(0x77, 0, words.len()));
    regs.load_mrs(1, &words).unwrap();
}

/// Client and server in separate processes with their own address spaces
struct TwoProcesses {
    kernel: Kernel,
    client_aspace: Arc<SoftAspace>,
    server_aspace: Arc<SoftAspace>,
    client: Arc<Thread>,
    server: Arc<Thread>,
}

impl TwoProcesses {
    fn new(client_job_policy: Option<PolicyAction>) -> Self {
        let kernel = Kernel::new(KernelConfig::default());
        let client_job = kernel.create_job(&kernel.root_job(), "clients").unwrap();
        if let Some(action) = client_job_policy {
            kernel
                .set_job_policy(
                    &client_job,
                    PolicyMode::Absolute,
                    &[PolicyItem::new(PolicyCondition::IpcMapGrant, action)],
                )
                .unwrap();
        }

        let client_aspace = Arc::new(SoftAspace::new(64));
        client_aspace
            .map_anonymous(Region::new(SEND_BASE, 2 * PAGE_SIZE), PageRights::RW)
            .unwrap();
        client_aspace.copy_to_user(SEND_BASE, &[77, 78]).unwrap();
        let server_aspace = Arc::new(SoftAspace::new(64));

        let client_process = kernel
            .create_process_with_aspace(&client_job, "client", client_aspace.clone())
            .unwrap();
        let server_process = kernel
            .create_process_with_aspace(&kernel.root_job(), "server", server_aspace.clone())
            .unwrap();
        let client = kernel.create_thread(&client_process, "client").unwrap();
        let server = kernel.create_thread(&server_process, "server").unwrap();

        Self {
            kernel,
            client_aspace,
            server_aspace,
            client,
            server,
        }
    }

    /// Server accepts a 64KiB window and waits; the client is left current
    fn server_waiting(&self) {
        let k = &self.kernel;
        k.start_thread(&self.server, 0).unwrap();
        k.start_thread(&self.client, 0).unwrap();
        k.reschedule(0);
        k.ipc_accept(&self.server, Acceptor::new(Fpage::new(WINDOW_BASE, 16, PageRights::RW)));
        assert!(k.ipc_receive(0, &self.client, Deadline::INFINITE).is_blocked());
        assert!(k.is_current(0, &self.client));
    }

    /// Let the server run and pick up its result
    fn server_result(&self) -> Option<Result<(), Error>> {
        self.kernel.yield_cpu(0);
        assert!(self.kernel.is_current(0, &self.server));
        self.kernel.take_return(&self.server)
    }

    fn assert_mailbox_balanced(&self) {
        let state = self.kernel.lock_state();
        let ipc = &state.threads.record(self.server.index()).ipc;
        assert_eq!(ipc.e.count(), 1);
        assert_eq!(ipc.f.count(), 0);
    }
}

fn map_item(base: usize, rights: PageRights) -> MessageItem {
    MessageItem::Map {
        page: Fpage::new(base, 12, rights),
        base: 0,
    }
}

#[test]
fn test_rendezvous_receiver_first() {
    // T2 receives before T1 sends
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t2, 0).unwrap();
    k.start_thread(&t1, 0).unwrap();

    k.reschedule(0);
    assert!(k.is_current(0, &t2));
    assert!(k.ipc_receive(0, &t1, Deadline::INFINITE).is_blocked());
    assert_eq!(k.thread_state(&t2), ThreadState::Sleeping);
    assert_eq!(k.ipc_status(&t2), IpcStatus::Receiving);
    assert!(k.is_current(0, &t1));

    set_message(k, &t1, &[0xfeed_f00d]);
    assert_eq!(k.ipc_send(0, &t2, Deadline::INFINITE), Syscall::Complete(Ok(())));
    assert_eq!(k.thread_state(&t2), ThreadState::Runnable);
    assert_eq!(k.ipc_status(&t1), IpcStatus::Free);

    k.yield_cpu(0);
    assert!(k.is_current(0, &t2));
    assert_eq!(k.take_return(&t2), Some(Ok(())));
    assert_eq!(k.ipc_get_mr(&t2, 1), Ok(0xfeed_f00d));
    assert_eq!(k.ipc_status(&t2), IpcStatus::Free);
}

#[test]
fn test_rendezvous_sender_first() {
    let fx = Fixture::started(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;

    k.reschedule(0);
    assert!(k.is_current(0, &t1));
    set_message(k, &t1, &[1, 2, 3]);
    assert!(k.ipc_send(0, &t2, Deadline::INFINITE).is_blocked());
    assert_eq!(k.ipc_status(&t1), IpcStatus::Sending);

    // t2 finds t1 sending, lets it through and waits for the copy
    assert!(k.is_current(0, &t2));
    assert!(k.ipc_receive(0, &t1, Deadline::INFINITE).is_blocked());
    assert!(k.is_current(0, &t1));
    assert_eq!(k.take_return(&t1), Some(Ok(())));
    assert_eq!(k.ipc_status(&t1), IpcStatus::Free);

    k.yield_cpu(0);
    assert!(k.is_current(0, &t2));
    assert_eq!(k.take_return(&t2), Some(Ok(())));
    for (i, word) in [1, 2, 3].into_iter().enumerate() {
        assert_eq!(k.ipc_get_mr(&t2, i + 1), Ok(word));
    }
}

#[test]
fn test_every_message_word_arrives() {
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t2, 0).unwrap();
    k.start_thread(&t1, 0).unwrap();
    k.reschedule(0);
    assert!(k.ipc_receive(0, &t1, Deadline::INFINITE).is_blocked());

    let words: Vec<Word> = (0..63).map(|i| 0x1000 + i).collect();
    set_message(k, &t1, &words);
    assert_eq!(k.ipc_send(0, &t2, Deadline::INFINITE).complete(), Some(Ok(())));
    k.yield_cpu(0);
    assert_eq!(k.take_return(&t2), Some(Ok(())));

    let received: Vec<Word> = (1..=63).map(|i| k.ipc_get_mr(&t2, i).unwrap()).collect();
    assert_eq!(received, words);
    assert_eq!(t2.regs().mr_count(), 64);
}

#[test]
fn test_send_timeout_leaves_state_free() {
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t1, 0).unwrap();
    k.reschedule(0);

    set_message(k, &t1, &[1]);
    assert!(k.ipc_send(0, &t2, Deadline::at(3)).is_blocked());
    assert_eq!(k.pending_timers(0), 1);
    assert!(k.current_thread(0).is_none());

    k.handle_timer_tick(0);
    k.handle_timer_tick(0);
    assert_eq!(k.thread_state(&t1), ThreadState::Sleeping);
    k.handle_timer_tick(0);
    assert_eq!(k.thread_state(&t1), ThreadState::Runnable);

    assert!(k.trap_return(0));
    assert!(k.is_current(0, &t1));
    assert_eq!(k.take_return(&t1), Some(Err(Error::TimedOut)));
    assert_eq!(k.ipc_status(&t1), IpcStatus::Free);

    let state = k.lock_state();
    assert!(state.wait_queue(WaitQueueId::new(t2.index(), WaitQueueKind::Senders)).is_empty());
}

#[test]
fn test_interrupted_send() {
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t1, 0).unwrap();
    k.reschedule(0);
    set_message(k, &t1, &[1]);
    assert!(k.ipc_send(0, &t2, Deadline::INFINITE).is_blocked());

    assert!(k.interrupt(0, &t1));
    assert!(!k.interrupt(0, &t1));
    k.reschedule(0);
    assert_eq!(k.take_return(&t1), Some(Err(Error::Interrupted)));
    assert_eq!(k.ipc_status(&t1), IpcStatus::Free);
}

#[test]
#[should_panic(expected = "empty message")]
fn test_empty_message_is_fatal() {
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t2, 0).unwrap();
    k.start_thread(&t1, 0).unwrap();
    k.reschedule(0);
    assert!(k.ipc_receive(0, &t1, Deadline::INFINITE).is_blocked());

    set_message(k, &t1, &[]);
    assert_eq!(k.ipc_send(0, &t2, Deadline::INFINITE).complete(), Some(Ok(())));
    k.yield_cpu(0);
}

#[test]
fn test_call_and_reply() {
    let fx = Fixture::new(2);
    let [client, server] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&server, 0).unwrap();
    k.start_thread(&client, 0).unwrap();

    k.reschedule(0);
    assert!(k.ipc_receive(0, &client, Deadline::INFINITE).is_blocked());

    set_message(k, &client, &[40]);
    assert!(k.ipc_call(0, &server, Deadline::INFINITE).is_blocked());
    assert_eq!(k.ipc_status(&client), IpcStatus::Receiving);

    // The server ran straight away and has the request
    assert!(k.is_current(0, &server));
    assert_eq!(k.take_return(&server), Some(Ok(())));
    let request = k.ipc_get_mr(&server, 1).unwrap();

    set_message(k, &server, &[request + 2]);
    assert_eq!(k.ipc_send(0, &client, Deadline::INFINITE).complete(), Some(Ok(())));
    k.yield_cpu(0);
    assert!(k.is_current(0, &client));
    assert_eq!(k.take_return(&client), Some(Ok(())));
    assert_eq!(k.ipc_get_mr(&client, 1), Ok(42));
}

#[test]
fn test_map_item_shares_frames() {
    let tp = TwoProcesses::new(None);
    tp.server_waiting();

    set_items(&tp.client, &[map_item(SEND_BASE, PageRights::READ)]);
    assert_eq!(tp.kernel.ipc_send(0, &tp.server, Deadline::INFINITE).complete(), Some(Ok(())));
    assert_eq!(tp.server_result(), Some(Ok(())));

    let sent = tp.client_aspace.frame_of(SEND_BASE).unwrap();
    let received = tp.server_aspace.frame_of(WINDOW_BASE).unwrap();
    assert!(Arc::ptr_eq(&sent, &received));
    assert_eq!(tp.server_aspace.rights_of(WINDOW_BASE), Some(PageRights::READ));
    assert_eq!(tp.client_aspace.rights_of(SEND_BASE), Some(PageRights::RW));

    let mut word = [0u64];
    tp.server_aspace.copy_from_user(WINDOW_BASE, &mut word).unwrap();
    assert_eq!(word, [77]);
    assert_eq!(tp.server_aspace.copy_to_user(WINDOW_BASE, &[1]), Err(Error::AccessDenied));
    assert!(!MessageTag::from_raw(tp.kernel.ipc_get_mr(&tp.server, 0).unwrap()).has_error());
}

#[test]
fn test_grant_item_moves_frames() {
    let tp = TwoProcesses::new(None);
    tp.server_waiting();

    let grant = MessageItem::Grant {
        page: Fpage::new(SEND_BASE, 13, PageRights::RW),
        base: 0x2000,
    };
    set_items(&tp.client, &[grant]);
    assert_eq!(tp.kernel.ipc_send(0, &tp.server, Deadline::INFINITE).complete(), Some(Ok(())));
    assert_eq!(tp.server_result(), Some(Ok(())));

    // An 8KiB page lands at the 8KiB-aligned offset of `base` in the window
    assert!(tp.client_aspace.frame_of(SEND_BASE).is_none());
    assert_eq!(tp.client_aspace.mapped_pages(), 0);
    assert_eq!(tp.server_aspace.mapped_pages(), 2);
    assert_eq!(tp.server_aspace.rights_of(WINDOW_BASE + 0x2000), Some(PageRights::RW));

    let mut words = [0u64; 2];
    tp.server_aspace.copy_from_user(WINDOW_BASE + 0x2000, &mut words).unwrap();
    assert_eq!(words, [77, 78]);
}

#[test]
fn test_failed_item_flags_receiver() {
    let tp = TwoProcesses::new(None);
    tp.server_waiting();

    // The first item goes through, the second names unmapped memory
    let items = [map_item(SEND_BASE, PageRights::RW), map_item(0x80_0000, PageRights::RW)];
    set_items(&tp.client, &items);
    assert_eq!(
        tp.kernel.ipc_send(0, &tp.server, Deadline::INFINITE).complete(),
        Some(Err(Error::NotFound))
    );
    assert_eq!(tp.kernel.ipc_status(&tp.client), IpcStatus::Free);

    assert_eq!(tp.server_result(), Some(Err(Error::NotFound)));
    assert_eq!(tp.kernel.ipc_status(&tp.server), IpcStatus::Free);
    let tag = MessageTag::from_raw(tp.kernel.ipc_get_mr(&tp.server, 0).unwrap());
    assert!(tag.has_error());
    assert_eq!(tag.label(), 0x77);

    // Nothing is rolled back
    assert!(tp.server_aspace.frame_of(WINDOW_BASE).is_some());
    tp.assert_mailbox_balanced();
}

#[test]
fn test_receiver_without_window_refuses_regions() {
    let tp = TwoProcesses::new(None);
    tp.kernel.start_thread(&tp.server, 0).unwrap();
    tp.kernel.start_thread(&tp.client, 0).unwrap();
    tp.kernel.reschedule(0);
    assert!(tp.kernel.ipc_receive(0, &tp.client, Deadline::INFINITE).is_blocked());

    set_items(&tp.client, &[map_item(SEND_BASE, PageRights::READ)]);
    assert_eq!(
        tp.kernel.ipc_send(0, &tp.server, Deadline::INFINITE).complete(),
        Some(Err(Error::AccessDenied))
    );
    assert_eq!(tp.server_result(), Some(Err(Error::AccessDenied)));
    assert_eq!(tp.server_aspace.mapped_pages(), 0);
    tp.assert_mailbox_balanced();
}

#[test]
fn test_job_policy_blocks_map_grant() {
    let tp = TwoProcesses::new(Some(PolicyAction::Deny));
    tp.server_waiting();

    set_items(&tp.client, &[map_item(SEND_BASE, PageRights::READ)]);
    assert_eq!(
        tp.kernel.ipc_send(0, &tp.server, Deadline::INFINITE).complete(),
        Some(Err(Error::AccessDenied))
    );
    assert_eq!(tp.server_result(), Some(Err(Error::AccessDenied)));
    assert_eq!(tp.server_aspace.mapped_pages(), 0);
}

#[test]
fn test_ipc_through_syscalls() {
    let kernel = Kernel::new(KernelConfig::default());
    let aspace = Arc::new(SoftAspace::new(8));
    aspace.map_anonymous(Region::new(0x1_0000, 2 * PAGE_SIZE), PageRights::RW).unwrap();
    let process = kernel
        .create_process_with_aspace(&kernel.root_job(), "app", aspace.clone())
        .unwrap();
    let client = kernel.create_thread(&process, "client").unwrap();
    let server = kernel.create_thread(&process, "server").unwrap();
    let to_server = kernel.install_handle(&process, server.clone(), Rights::WRITE).unwrap();
    let from_client = kernel.install_handle(&process, client.clone(), Rights::READ).unwrap();
    kernel.start_thread(&server, 0).unwrap();
    kernel.start_thread(&client, 0).unwrap();
    kernel.reschedule(0);

    let call = |number, args: [usize; 6]| kernel.syscall_dispatch(0, SyscallArgs::new(number, args));
    let forever = u64::MAX as usize;

    // server
    let receive = call(SyscallNumber::rx_ipc_receive, [from_client.into_raw() as usize, forever, 0, 0, 0, 0]);
    assert!(receive.is_blocked());

    // client, first through a handle without WRITE
    assert_eq!(
        call(SyscallNumber::rx_ipc_send, [from_client.into_raw() as usize, forever, 0, 0, 0, 0]),
        Syscall::Complete(Err(Error::AccessDenied))
    );
    aspace.copy_to_user(0x1_0000, &[5, 6]).unwrap();
    let tag = MessageTag::new(3, 2, 0);
    assert_eq!(
        call(SyscallNumber::rx_ipc_load_message, [tag.raw() as usize, 0x1_0000, 0, 0, 0, 0]),
        Syscall::Complete(Ok(0))
    );
    assert_eq!(
        call(SyscallNumber::rx_ipc_send, [to_server.into_raw() as usize, forever, 0, 0, 0, 0]),
        Syscall::Complete(Ok(0))
    );

    // server again
    assert_eq!(call(SyscallNumber::rx_thread_yield, [0; 6]), Syscall::Complete(Ok(0)));
    assert!(kernel.is_current(0, &server));
    assert_eq!(kernel.take_return(&server), Some(Ok(())));
    assert_eq!(
        call(SyscallNumber::rx_ipc_store_message, [0x1_1000, 1, 0, 0, 0, 0]),
        Syscall::Complete(Err(Error::OutOfRange))
    );
    assert_eq!(
        call(SyscallNumber::rx_ipc_store_message, [0x1_1000, 4, 0, 0, 0, 0]),
        Syscall::Complete(Ok(tag.raw() as usize))
    );
    let mut words = [0u64; 2];
    aspace.copy_from_user(0x1_1000, &mut words).unwrap();
    assert_eq!(words, [5, 6]);
    assert_eq!(
        call(SyscallNumber::rx_ipc_get_mr, [64, 0, 0, 0, 0, 0]),
        Syscall::Complete(Err(Error::OutOfRange))
    );
}

#[test]
fn test_thread_killed_from_other_cpu_cannot_block() {
    let fx = Fixture::with_cpus(2, 2);
    let [victim, killer] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&victim, 0).unwrap();
    k.start_thread(&killer, 1).unwrap();
    k.reschedule(0);
    k.reschedule(1);
    assert!(k.is_current(0, &victim));
    assert!(k.is_current(1, &killer));

    let handle = k.install_handle(&fx.process, victim.clone(), Rights::all()).unwrap();
    let kill = SyscallArgs::new(SyscallNumber::rx_task_kill, [handle.into_raw() as usize, 0, 0, 0, 0, 0]);
    assert_eq!(k.syscall_dispatch(1, kill), Syscall::Complete(Ok(0)));
    assert_eq!(k.thread_state(&victim), ThreadState::Dying);
    assert!(k.is_current(0, &victim));
    assert!(k.need_reschedule(0));

    set_message(k, &victim, &[5]);
    assert_eq!(k.ipc_receive(0, &killer, Deadline::INFINITE), Syscall::Complete(Err(Error::BadState)));
    assert_eq!(k.ipc_send(0, &killer, Deadline::INFINITE), Syscall::Complete(Err(Error::BadState)));
    assert_eq!(k.ipc_call(0, &killer, Deadline::at(50)), Syscall::Complete(Err(Error::BadState)));
    assert_eq!(k.ipc_status(&victim), IpcStatus::Free);
    assert_eq!(k.pending_timers(0), 0);
    {
        let state = k.lock_state();
        for kind in [WaitQueueKind::Senders, WaitQueueKind::Receivers] {
            assert!(state.wait_queue(WaitQueueId::new(killer.index(), kind)).is_empty());
        }
    }

    assert!(k.trap_return(0));
    assert!(k.current_thread(0).is_none());
    k.handle_timer_tick(0);
    assert_eq!(k.thread_state(&victim), ThreadState::Unused);
    assert!(k.is_current(1, &killer));
}

#[test]
fn test_early_wakeups_leave_no_timers_behind() {
    let fx = Fixture::new(2);
    let [t1, t2] = fx.threads::<2>();
    let k = &fx.kernel;
    k.start_thread(&t1, 0).unwrap();
    k.reschedule(0);
    set_message(k, &t1, &[1]);

    for _ in 0..100 {
        assert!(k.ipc_send(0, &t2, Deadline::at(1_000_000)).is_blocked());
        assert_eq!(k.pending_timers(0), 1);
        assert!(k.interrupt(0, &t1));
        assert_eq!(k.pending_timers(0), 0);
        k.reschedule(0);
        assert_eq!(k.take_return(&t1), Some(Err(Error::Interrupted)));
    }

    // Killing a timed sleeper drops its timer too
    assert!(k.ipc_send(0, &t2, Deadline::at(1_000_000)).is_blocked());
    assert_eq!(k.pending_timers(0), 1);
    assert!(k.kill_thread(0, &t1));
    assert_eq!(k.pending_timers(0), 0);
}
