// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronous IPC
//!
//! Rendezvous message passing between two threads. A send completes only
//! when the receiver has been handed the message; a receive completes only
//! when a message has arrived. Nothing is buffered beyond one message in the
//! receiver's own registers.
//!
//! # Protocol
//!
//! Each thread's IPC state carries a semaphore pair used as a single-slot
//! mailbox for messages sent to it: `e` (registers free, starts at 1) and
//! `f` (message ready, starts at 0).
//!
//! ```text
//! send(to)                              receive(from)
//!   state = SENDING                       state = RECEIVING
//!   wait on to.senders until              wait on from.receivers until
//!     `to` receives from us                 `from` sends to us
//!   wait(to.e)                            wake my senders
//!   copy MRs, transfer typed items        wait(my f)
//!   signal(to.f)                          check the tag is not empty
//!   state = FREE, wake my receivers       state = FREE, signal(my e)
//! ```
//!
//! Every step runs under the governing thread lock. A thread only sleeps
//! inside a wait queue or semaphore wait; the step it slept in is kept as a
//! [`PendingOp`] and continued when the scheduler switches back to it.
//! Any failure or timeout puts the thread back to FREE.
//!
//! # Lock Order
//!
//! thread lock, then sender registers, then receiver registers, then one
//! address space at a time.
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{Deadline, Kernel, KernelConfig, MessageTag};
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let process = kernel.create_process(&kernel.root_job(), "ipc").unwrap();
//! let client = kernel.create_thread(&process, "client").unwrap();
//! let server = kernel.create_thread(&process, "server").unwrap();
//! kernel.start_thread(&server, 0).unwrap();
//! kernel.start_thread(&client, 0).unwrap();
//!
//! // The server waits for the client and sleeps
//! kernel.reschedule(0);
//! assert!(kernel.ipc_receive(0, &client, Deadline::INFINITE).is_blocked());
//!
//! // The client runs next and sends
//! kernel.ipc_set_mr(&client, 1, 42).unwrap();
//! kernel.ipc_set_mr(&client, 0, MessageTag::new(0, 1, 0).raw()).unwrap();
//! assert_eq!(kernel.ipc_send(0, &server, Deadline::INFINITE).complete(), Some(Ok(())));
//!
//! // The server picks up its result once it runs again
//! kernel.yield_cpu(0);
//! assert_eq!(kernel.take_return(&server), Some(Ok(())));
//! assert_eq!(kernel.ipc_get_mr(&server, 1), Ok(42));
//! ```

use alloc::vec;
use core::task::Poll;

use crate::kernel::object::job::PolicyCondition;
use crate::kernel::process::Process;
use crate::kernel::sched::{SchedState, Syscall};
use crate::kernel::sync::{Semaphore, WaitQueue, WaitQueueId, WaitQueueKind};
use crate::kernel::thread::{describe, Interruptible, QueueLink, Thread, ThreadIndex, ThreadState};
use crate::kernel::timer::Deadline;
use crate::kernel::usercopy::UserPtr;
use crate::kernel::vm::{self, TransferMode};
use crate::kernel::Kernel;
use crate::rustux::errors::{Error, Result};
use crate::rustux::types::{CpuId, Word};
use crate::{kassert, kernel_panic, log_debug, log_trace};

pub mod message;

pub use crate::kernel::vm::PageRights;
pub use message::{Acceptor, Fpage, MessageItem, MessageRegisters, MessageTag, BR_SIZE, MR_SIZE};

/// ============================================================================
/// IPC State
/// ============================================================================

/// Where a thread is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcStatus {
    Free,
    Sending,
    Receiving,
}

/// Per-thread protocol state, guarded by the thread lock
#[derive(Debug)]
pub struct IpcState {
    pub state: IpcStatus,
    /// Thread being sent to or received from
    pub partner: Option<ThreadIndex>,
    /// Registers free for the next incoming message
    pub e: Semaphore,
    /// Incoming message ready
    pub f: Semaphore,
    pub sender_wait_queue: WaitQueue,
    pub receiver_wait_queue: WaitQueue,
    /// Set by a sender whose region transfer failed
    pub transfer_error: Option<Error>,
}

impl Default for IpcState {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcState {
    pub fn new() -> Self {
        Self {
            state: IpcStatus::Free,
            partner: None,
            e: Semaphore::new(1),
            f: Semaphore::new(0),
            sender_wait_queue: WaitQueue::new(),
            receiver_wait_queue: WaitQueue::new(),
            transfer_error: None,
        }
    }

    pub fn is_sending_to(&self, thread: ThreadIndex) -> bool {
        self.state == IpcStatus::Sending && self.partner == Some(thread)
    }

    pub fn is_receiving_from(&self, thread: ThreadIndex) -> bool {
        self.state == IpcStatus::Receiving && self.partner == Some(thread)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    /// Waiting for the receiver to start receiving from us
    AwaitReceiver,
    /// Waiting for the receiver's registers to be free
    AwaitEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvPhase {
    /// Waiting for the sender to start sending to us
    AwaitSender,
    /// Waiting for the message to land
    AwaitFull,
}

/// IPC operation a sleeping thread continues when it runs again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Send {
        to: ThreadIndex,
        deadline: Deadline,
        phase: SendPhase,
        /// Receive from `to` once the send is done
        then_receive: bool,
    },
    Receive {
        from: ThreadIndex,
        deadline: Deadline,
        phase: RecvPhase,
    },
}

/// ============================================================================
/// Protocol
/// ============================================================================

impl SchedState {
    fn ipc(&self, thread: ThreadIndex) -> &IpcState {
        &self.threads.record(thread).ipc
    }

    fn ipc_mut(&mut self, thread: ThreadIndex) -> &mut IpcState {
        &mut self.threads.record_mut(thread).ipc
    }

    fn ipc_reset(&mut self, thread: ThreadIndex) {
        let ipc = self.ipc_mut(thread);
        ipc.state = IpcStatus::Free;
        ipc.partner = None;
    }

    fn ipc_abort(&mut self, cur: ThreadIndex, err: Error) -> Poll<Result<()>> {
        log_debug!("{:?} ipc failed: {}", cur, err);
        self.ipc_reset(cur);
        Poll::Ready(Err(err))
    }

    /// `peer` must be a live thread other than `cur`
    fn check_peer(&self, cur: ThreadIndex, peer: ThreadIndex) -> Result {
        if peer == cur {
            return Err(Error::InvalidArgs);
        }
        match self.threads.get(peer) {
            Some(record) if record.state.is_alive() && !record.idle => Ok(()),
            _ => Err(Error::PeerClosed),
        }
    }

    /// Sleep on `queue`, continuing with `op` once woken
    fn ipc_suspend(
        &mut self,
        cur: ThreadIndex,
        queue: WaitQueueId,
        deadline: Deadline,
        op: PendingOp,
    ) -> Poll<Result<()>> {
        match self.block(cur, queue, Interruptible::Yes, deadline) {
            Poll::Pending => {
                self.threads.record_mut(cur).pending = Some(op);
                Poll::Pending
            }
            Poll::Ready(Err(err)) => self.ipc_abort(cur, err),
            Poll::Ready(Ok(())) => kernel_panic!("{:?} blocked without sleeping", cur),
        }
    }

    /// Start sending the message in `cur`'s registers to `to`
    pub(crate) fn ipc_send(
        &mut self,
        cur: ThreadIndex,
        to: ThreadIndex,
        deadline: Deadline,
        then_receive: bool,
    ) -> Poll<Result<()>> {
        let tag = self.threads.record(cur).thread.regs().message_tag();
        if let Err(err) = tag.validate().and_then(|_| self.check_peer(cur, to)) {
            return Poll::Ready(Err(err));
        }

        let ipc = self.ipc_mut(cur);
        ipc.state = IpcStatus::Sending;
        ipc.partner = Some(to);
        log_trace!("{:?} send -> {:?} {:?}", cur, to, tag);
        self.send_step(cur, to, deadline, SendPhase::AwaitReceiver, then_receive)
    }

    fn send_step(
        &mut self,
        cur: ThreadIndex,
        to: ThreadIndex,
        deadline: Deadline,
        mut phase: SendPhase,
        then_receive: bool,
    ) -> Poll<Result<()>> {
        loop {
            if let Err(err) = self.check_peer(cur, to) {
                return self.ipc_abort(cur, err);
            }
            match phase {
                SendPhase::AwaitReceiver => {
                    if !self.ipc(to).is_receiving_from(cur) {
                        let senders = WaitQueueId::new(to, WaitQueueKind::Senders);
                        let op = PendingOp::Send {
                            to,
                            deadline,
                            phase,
                            then_receive,
                        };
                        return self.ipc_suspend(cur, senders, deadline, op);
                    }
                    phase = SendPhase::AwaitEmpty;
                }
                SendPhase::AwaitEmpty => {
                    let empty = WaitQueueId::new(to, WaitQueueKind::Empty);
                    match self.sem_wait(cur, empty, deadline) {
                        Poll::Pending => {
                            self.threads.record_mut(cur).pending = Some(PendingOp::Send {
                                to,
                                deadline,
                                phase,
                                then_receive,
                            });
                            return Poll::Pending;
                        }
                        Poll::Ready(Err(err)) => return self.ipc_abort(cur, err),
                        Poll::Ready(Ok(())) => {}
                    }
                    if !self.ipc(to).is_receiving_from(cur) {
                        // The receiver gave up while we waited; hand the slot back
                        self.sem_signal(empty);
                        phase = SendPhase::AwaitReceiver;
                        continue;
                    }
                    return self.send_complete(cur, to, deadline, then_receive);
                }
            }
        }
    }

    fn send_complete(
        &mut self,
        cur: ThreadIndex,
        to: ThreadIndex,
        deadline: Deadline,
        then_receive: bool,
    ) -> Poll<Result<()>> {
        let result = self.deliver(cur, to);
        self.sem_signal(WaitQueueId::new(to, WaitQueueKind::Full));
        self.ipc_reset(cur);
        self.wake_all(WaitQueueId::new(cur, WaitQueueKind::Receivers), Ok(()));
        log_trace!("{:?} delivered to {:?}", cur, to);

        if let Err(err) = result {
            return Poll::Ready(Err(err));
        }
        if then_receive {
            return self.ipc_receive(cur, to, deadline);
        }
        Poll::Ready(Ok(()))
    }

    /// Copy the message into `to`'s registers and transfer its typed items
    ///
    /// A failed item stops the transfer. Items already transferred stay
    /// where they are; the receiver sees the error flag in its tag.
    fn deliver(&mut self, cur: ThreadIndex, to: ThreadIndex) -> Result {
        let sender = self.threads.record(cur).thread.clone();
        let receiver = self.threads.record(to).thread.clone();
        let src = sender.regs();
        let mut dst = receiver.regs();

        src.copy_to(&mut dst);
        if src.message_tag().typed() == 0 {
            return Ok(());
        }

        let result = transfer_items(&sender, &receiver, &src, dst.acceptor());
        if let Err(err) = result {
            log_debug!(
                "{} -> {}: region transfer failed: {}",
                describe(&sender),
                describe(&receiver),
                err
            );
            dst.flag_transfer_error();
            self.ipc_mut(to).transfer_error = Some(err);
        }
        result
    }

    /// Start receiving a message from `from`
    pub(crate) fn ipc_receive(&mut self, cur: ThreadIndex, from: ThreadIndex, deadline: Deadline) -> Poll<Result<()>> {
        if let Err(err) = self.check_peer(cur, from) {
            return self.ipc_abort(cur, err);
        }

        let ipc = self.ipc_mut(cur);
        ipc.state = IpcStatus::Receiving;
        ipc.partner = Some(from);
        log_trace!("{:?} receive <- {:?}", cur, from);

        if !self.ipc(from).is_sending_to(cur) {
            let receivers = WaitQueueId::new(from, WaitQueueKind::Receivers);
            let op = PendingOp::Receive {
                from,
                deadline,
                phase: RecvPhase::AwaitSender,
            };
            return self.ipc_suspend(cur, receivers, deadline, op);
        }
        self.recv_release_senders(cur, from, deadline)
    }

    fn recv_release_senders(&mut self, cur: ThreadIndex, from: ThreadIndex, deadline: Deadline) -> Poll<Result<()>> {
        self.wake_all(WaitQueueId::new(cur, WaitQueueKind::Senders), Ok(()));
        self.recv_await_full(cur, from, deadline)
    }

    fn recv_await_full(&mut self, cur: ThreadIndex, from: ThreadIndex, deadline: Deadline) -> Poll<Result<()>> {
        let full = WaitQueueId::new(cur, WaitQueueKind::Full);
        match self.sem_wait(cur, full, deadline) {
            Poll::Pending => {
                self.threads.record_mut(cur).pending = Some(PendingOp::Receive {
                    from,
                    deadline,
                    phase: RecvPhase::AwaitFull,
                });
                Poll::Pending
            }
            Poll::Ready(Err(err)) => self.ipc_abort(cur, err),
            Poll::Ready(Ok(())) => self.recv_complete(cur, from),
        }
    }

    fn recv_complete(&mut self, cur: ThreadIndex, from: ThreadIndex) -> Poll<Result<()>> {
        let tag = self.threads.record(cur).thread.regs().message_tag();
        kassert!(!tag.is_empty(), "empty message from {:?} to {:?}", from, cur);

        let error = self.ipc_mut(cur).transfer_error.take();
        self.ipc_reset(cur);
        self.sem_signal(WaitQueueId::new(cur, WaitQueueKind::Empty));
        log_trace!("{:?} received {:?} from {:?}", cur, tag, from);
        Poll::Ready(error.map_or(Ok(()), Err))
    }

    /// Continue the operation `cur` was blocked in
    pub(crate) fn resume(&mut self, cur: ThreadIndex, op: PendingOp, woke: Result<()>) -> Poll<Result<()>> {
        if let Err(err) = woke {
            return self.ipc_abort(cur, err);
        }
        match op {
            PendingOp::Send {
                to,
                deadline,
                phase,
                then_receive,
            } => self.send_step(cur, to, deadline, phase, then_receive),
            PendingOp::Receive {
                from,
                deadline,
                phase: RecvPhase::AwaitSender,
            } => match self.check_peer(cur, from) {
                Ok(()) => self.recv_release_senders(cur, from, deadline),
                Err(err) => self.ipc_abort(cur, err),
            },
            PendingOp::Receive {
                from,
                deadline,
                phase: RecvPhase::AwaitFull,
            } => self.recv_await_full(cur, from, deadline),
        }
    }

    /// `thread` is dying: release everyone waiting on it
    pub(crate) fn ipc_peer_closed(&mut self, thread: ThreadIndex) {
        let (state, partner) = {
            let ipc = self.ipc(thread);
            (ipc.state, ipc.partner)
        };
        self.ipc_reset(thread);
        for kind in [
            WaitQueueKind::Senders,
            WaitQueueKind::Receivers,
            WaitQueueKind::Empty,
            WaitQueueKind::Full,
        ] {
            self.wake_all(WaitQueueId::new(thread, kind), Err(Error::PeerClosed));
        }

        // A receiver already waiting for our message sleeps on its own queue
        if let (IpcStatus::Sending, Some(peer)) = (state, partner) {
            let full = QueueLink::Wait(WaitQueueId::new(peer, WaitQueueKind::Full));
            let waiting = self
                .threads
                .get(peer)
                .is_some_and(|record| record.link == full && record.ipc.is_receiving_from(thread));
            if waiting {
                self.wake_thread(peer, Err(Error::PeerClosed));
            }
        }
    }
}

/// Transfer every typed item of the message in `src`
fn transfer_items(sender: &Thread, receiver: &Thread, src: &MessageRegisters, acceptor: Acceptor) -> Result {
    let src_process = sender.process().ok_or(Error::BadState)?;
    let dst_process = receiver.process().ok_or(Error::BadState)?;
    check_map_grant_policy(&src_process)?;

    for item in src.items() {
        let (page, base, mode) = match item? {
            MessageItem::Untyped(_) => continue,
            MessageItem::Map { page, base } => (page, base, TransferMode::Map),
            MessageItem::Grant { page, base } => (page, base, TransferMode::Grant),
        };
        let (send, receive) = acceptor.accept(page, base)?;
        vm::transfer_region(
            src_process.aspace().as_ref(),
            dst_process.aspace().as_ref(),
            send,
            receive,
            page.rights(),
            mode,
        )?;
    }
    Ok(())
}

fn check_map_grant_policy(process: &Process) -> Result {
    let job = process.job().ok_or(Error::BadState)?;
    if job.check_policy(PolicyCondition::IpcMapGrant).is_allowed() {
        Ok(())
    } else {
        Err(Error::AccessDenied)
    }
}

/// ============================================================================
/// Kernel Entry Points
/// ============================================================================

impl Kernel {
    /// Run an IPC step for the current thread of `cpu`, switching away if
    /// it blocks
    ///
    /// A thread killed while running fails with `BadState` and leaves its
    /// IPC state untouched; it is diverted to the zombie queue on its next
    /// trap return.
    fn ipc_enter(
        &self,
        cpu: CpuId,
        op: impl FnOnce(&mut SchedState, ThreadIndex) -> Poll<Result<()>>,
    ) -> Syscall<()> {
        let mut state = self.thread_lock.lock(cpu);
        let current = match state.current(cpu) {
            Some(current) if state.threads.record(current).state == ThreadState::Running => current,
            _ => return Syscall::Complete(Err(Error::BadState)),
        };
        let poll = op(&mut *state, current);
        if poll.is_pending() {
            state.switch_and_resume(cpu);
        }
        self.unlock(cpu, state);
        poll.into()
    }

    /// Send the current thread's message to `to`
    pub fn ipc_send(&self, cpu: CpuId, to: &Thread, deadline: Deadline) -> Syscall<()> {
        self.ipc_enter(cpu, |state, cur| state.ipc_send(cur, to.index(), deadline, false))
    }

    /// Receive a message from `from` into the current thread's registers
    pub fn ipc_receive(&self, cpu: CpuId, from: &Thread, deadline: Deadline) -> Syscall<()> {
        self.ipc_enter(cpu, |state, cur| state.ipc_receive(cur, from.index(), deadline))
    }

    /// Send to `to`, then receive its reply, under one deadline
    pub fn ipc_call(&self, cpu: CpuId, to: &Thread, deadline: Deadline) -> Syscall<()> {
        self.ipc_enter(cpu, |state, cur| state.ipc_send(cur, to.index(), deadline, true))
    }

    /// Protocol state of `thread`; `Free` once it has been reaped
    pub fn ipc_status(&self, thread: &Thread) -> IpcStatus {
        let state = self.lock_state();
        state
            .threads
            .get(thread.index())
            .map_or(IpcStatus::Free, |record| record.ipc.state)
    }

    /// Set `thread`'s tag and load the words it counts from user memory
    pub fn ipc_load_message(&self, thread: &Thread, tag: MessageTag, src: UserPtr) -> Result {
        tag.validate()?;
        if src.len() != tag.words() {
            return Err(Error::InvalidArgs);
        }
        let process = thread.process().ok_or(Error::BadState)?;
        let mut words = vec![0; src.len()];
        src.copy_in(process.aspace().as_ref(), &mut words)?;

        let mut regs = thread.regs();
        regs.set_message_tag(tag);
        regs.load_mrs(1, &words)
    }

    /// Copy `thread`'s message out to user memory, returning its tag
    pub fn ipc_store_message(&self, thread: &Thread, dst: UserPtr) -> Result<MessageTag> {
        let (tag, words) = {
            let regs = thread.regs();
            let tag = regs.message_tag();
            let mut words = vec![0; tag.words().min(MR_SIZE - 1)];
            regs.store_mrs(1, &mut words)?;
            (tag, words)
        };
        if dst.len() < words.len() {
            return Err(Error::OutOfRange);
        }
        let process = thread.process().ok_or(Error::BadState)?;
        UserPtr::new(dst.addr(), words.len())?.copy_out(process.aspace().as_ref(), &words)?;
        Ok(tag)
    }

    /// Publish the window `thread` accepts regions in
    pub fn ipc_accept(&self, thread: &Thread, acceptor: Acceptor) {
        thread.regs().set_acceptor(acceptor);
    }

    pub fn ipc_set_br(&self, thread: &Thread, index: usize, value: Word) -> Result {
        thread.regs().set_br(index, value)
    }

    pub fn ipc_get_mr(&self, thread: &Thread, index: usize) -> Result<Word> {
        thread.regs().get_mr(index)
    }

    pub fn ipc_set_mr(&self, thread: &Thread, index: usize, value: Word) -> Result {
        thread.regs().set_mr(index, value)
    }
}
