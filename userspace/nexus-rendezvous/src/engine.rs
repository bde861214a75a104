// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Rendezvous engine pairing blocked senders with receivers on one channel
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Internal
//! TEST_COVERAGE: Unit tests (pairing, double reply, timeout cancellation, close)
//!
//! Every pending call lives in its channel's state and is only touched under the channel
//! mutex. Senders park on a per-call condvar, receivers on the channel condvar. A record is
//! removed from the channel only by its own sender (after collecting the outcome or on
//! timeout), so a late reply to a cancelled call fails with `InvalidHandle` instead of
//! resurrecting it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace, warn};
use nexus_envelope::{self as codec, Envelope};
use parking_lot::{Condvar, Mutex};

use crate::{ChannelId, ConnectionId, IpcError, ProcessId, Result, Wait};

/// Lifecycle of one in-flight request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    /// Queued on the channel, no receiver has taken it yet.
    AwaitingReceive,
    /// Handed to a receiver, waiting for `reply`.
    AwaitingReply,
    /// Reply delivered.
    Completed,
    /// Failed before a reply was delivered.
    Aborted,
}

/// Snapshot of a channel's queues.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Whether the channel still accepts calls.
    pub open: bool,
    /// Calls waiting for a receiver.
    pub queued: usize,
    /// Calls received but not yet answered.
    pub awaiting_reply: usize,
    /// Receivers currently blocked on the channel.
    pub waiting_receivers: usize,
}

struct PendingCall {
    sender: ProcessId,
    connection: ConnectionId,
    frame: Vec<u8>,
    state: CallState,
    outcome: Option<Result<Envelope>>,
    wake: Arc<Condvar>,
}

impl PendingCall {
    fn is_settled(&self) -> bool {
        matches!(self.state, CallState::Completed | CallState::Aborted)
    }

    fn finish(&mut self, state: CallState, outcome: Result<Envelope>) {
        self.state = state;
        self.outcome = Some(outcome);
        self.wake.notify_one();
    }
}

struct ChannelState {
    open: bool,
    next_call: u64,
    queue: VecDeque<u64>,
    calls: HashMap<u64, PendingCall>,
    waiting_receivers: usize,
}

impl ChannelState {
    fn take_outcome(&mut self, call: u64) -> Result<Envelope> {
        self.calls
            .remove(&call)
            .and_then(|pending| pending.outcome)
            .unwrap_or(Err(IpcError::PeerGone))
    }

    fn is_settled(&self, call: u64) -> bool {
        self.calls.get(&call).map_or(true, PendingCall::is_settled)
    }
}

/// Converts a wait mode into an absolute deadline. Overflowing deadlines block indefinitely.
pub(crate) fn deadline_after(wait: Wait) -> Option<Instant> {
    wait.timeout().and_then(|timeout| Instant::now().checked_add(timeout))
}

/// Kernel object requests are received on.
pub(crate) struct Channel {
    id: ChannelId,
    owner: ProcessId,
    max_payload: usize,
    state: Mutex<ChannelState>,
    receivers: Condvar,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, owner: ProcessId, max_payload: usize) -> Self {
        Self {
            id,
            owner,
            max_payload,
            state: Mutex::new(ChannelState {
                open: true,
                next_call: 1,
                queue: VecDeque::new(),
                calls: HashMap::new(),
                waiting_receivers: 0,
            }),
            receivers: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    /// Queues `request` and blocks until it is answered, aborted or `deadline` passes.
    ///
    /// With `require_receiver` the call is refused with `WouldBlock` unless a blocked
    /// receiver is free to take it right away.
    pub(crate) fn send(
        &self,
        sender: ProcessId,
        connection: ConnectionId,
        sender_alive: &AtomicBool,
        request: &Envelope,
        deadline: Option<Instant>,
        require_receiver: bool,
    ) -> Result<Envelope> {
        request.check(self.max_payload)?;
        let frame = codec::encode(request);
        let wake = Arc::new(Condvar::new());

        let mut state = self.state.lock();
        // Checked under the channel lock so a concurrent termination sweep cannot miss us.
        if !sender_alive.load(Ordering::Acquire) {
            return Err(IpcError::Terminated);
        }
        if !state.open {
            return Err(IpcError::PeerGone);
        }
        if require_receiver && state.waiting_receivers <= state.queue.len() {
            return Err(IpcError::WouldBlock);
        }

        let call = state.next_call;
        state.next_call += 1;
        state.calls.insert(
            call,
            PendingCall {
                sender,
                connection,
                frame,
                state: CallState::AwaitingReceive,
                outcome: None,
                wake: Arc::clone(&wake),
            },
        );
        state.queue.push_back(call);
        if state.waiting_receivers > 0 {
            self.receivers.notify_one();
        }
        trace!("rendezvous: {sender}/{connection} queued call {call} on {}", self.id);

        loop {
            if state.is_settled(call) {
                return state.take_outcome(call);
            }
            match deadline {
                None => wake.wait(&mut state),
                Some(at) => {
                    if wake.wait_until(&mut state, at).timed_out() {
                        if state.is_settled(call) {
                            return state.take_outcome(call);
                        }
                        state.queue.retain(|queued| *queued != call);
                        state.calls.remove(&call);
                        debug!("rendezvous: call {call} on {} cancelled by timeout", self.id);
                        return Err(IpcError::Timeout);
                    }
                }
            }
        }
    }

    /// Takes the oldest queued call, blocking until one arrives, the channel closes, or
    /// `deadline` passes.
    pub(crate) fn receive(
        &self,
        deadline: Option<Instant>,
        non_blocking: bool,
    ) -> Result<(u64, Envelope)> {
        let mut state = self.state.lock();
        loop {
            if !state.open {
                return Err(IpcError::Closed);
            }
            while let Some(call) = state.queue.pop_front() {
                let Some(pending) = state.calls.get_mut(&call) else {
                    continue;
                };
                pending.state = CallState::AwaitingReply;
                let frame = std::mem::take(&mut pending.frame);
                match codec::decode(&frame, self.max_payload) {
                    Ok(request) => {
                        trace!(
                            "rendezvous: {} received call {call} from {}/{}",
                            self.id,
                            pending.sender,
                            pending.connection
                        );
                        return Ok((call, request));
                    }
                    Err(err) => {
                        warn!("rendezvous: {} rejected call {call}: {err}", self.id);
                        pending.finish(CallState::Aborted, Err(err.into()));
                    }
                }
            }
            if non_blocking {
                return Err(IpcError::WouldBlock);
            }

            state.waiting_receivers += 1;
            let timed_out = match deadline {
                None => {
                    self.receivers.wait(&mut state);
                    false
                }
                Some(at) => self.receivers.wait_until(&mut state, at).timed_out(),
            };
            state.waiting_receivers -= 1;
            if timed_out && state.open && state.queue.is_empty() {
                return Err(IpcError::Timeout);
            }
        }
    }

    /// Completes `call` with `reply` and wakes exactly its sender.
    pub(crate) fn reply(&self, call: u64, reply: &Envelope) -> Result<()> {
        reply.check(self.max_payload)?;
        let delivered = codec::decode(&codec::encode(reply), self.max_payload)?;

        let mut state = self.state.lock();
        let pending = Self::answerable(&mut state, call)?;
        pending.finish(CallState::Completed, Ok(delivered));
        trace!("rendezvous: {} replied to call {call}", self.id);
        Ok(())
    }

    /// Fails `call` with `PeerGone` instead of replying.
    pub(crate) fn abort(&self, call: u64) -> Result<()> {
        let mut state = self.state.lock();
        let pending = Self::answerable(&mut state, call)?;
        pending.finish(CallState::Aborted, Err(IpcError::PeerGone));
        debug!("rendezvous: {} aborted call {call}", self.id);
        Ok(())
    }

    fn answerable(state: &mut ChannelState, call: u64) -> Result<&mut PendingCall> {
        match state.calls.get_mut(&call) {
            Some(pending) if pending.state == CallState::AwaitingReply => Ok(pending),
            _ => Err(IpcError::InvalidHandle),
        }
    }

    /// Closes the channel: unsettled calls fail with `PeerGone`, receivers with `Closed`.
    ///
    /// Returns `(aborted calls, woken receivers)`.
    pub(crate) fn close(&self) -> (usize, usize) {
        let mut state = self.state.lock();
        if !state.open {
            return (0, 0);
        }
        state.open = false;
        state.queue.clear();
        let mut aborted = 0;
        for pending in state.calls.values_mut().filter(|pending| !pending.is_settled()) {
            pending.finish(CallState::Aborted, Err(IpcError::PeerGone));
            aborted += 1;
        }
        let receivers = state.waiting_receivers;
        self.receivers.notify_all();
        debug!(
            "rendezvous: closed {} of {} ({aborted} calls aborted, {receivers} receivers woken)",
            self.id, self.owner
        );
        (aborted, receivers)
    }

    /// Aborts every unsettled call issued by `sender`. Used when that process terminates.
    pub(crate) fn abort_sender(&self, sender: ProcessId) -> usize {
        let mut state = self.state.lock();
        let ChannelState { queue, calls, .. } = &mut *state;
        let mut aborted = 0;
        for (call, pending) in calls.iter_mut() {
            if pending.sender != sender || pending.is_settled() {
                continue;
            }
            queue.retain(|queued| queued != call);
            pending.finish(CallState::Aborted, Err(IpcError::Terminated));
            aborted += 1;
        }
        aborted
    }

    pub(crate) fn info(&self) -> ChannelInfo {
        let state = self.state.lock();
        ChannelInfo {
            open: state.open,
            queued: state.queue.len(),
            awaiting_reply: state
                .calls
                .values()
                .filter(|pending| pending.state == CallState::AwaitingReply)
                .count(),
            waiting_receivers: state.waiting_receivers,
        }
    }
}
