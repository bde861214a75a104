// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process connection table and the per-connection send gate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::config::SendPolicy;
use crate::{ChannelId, ConnectionId, IpcError, ProcessId, Resource, Result};

/// Liveness of a connection as last observed by the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Target channel was alive at the last check.
    Open,
    /// Target channel or its process is gone; sends fail with `PeerGone`.
    Broken,
}

/// Resolved send target handed to the engine.
pub(crate) struct Route {
    pub(crate) pid: ProcessId,
    pub(crate) chid: ChannelId,
    pub(crate) gate: Arc<SendGate>,
}

struct Connection {
    pid: ProcessId,
    chid: ChannelId,
    state: ConnectionState,
    gate: Arc<SendGate>,
}

pub(crate) struct ConnectionTable {
    next: u32,
    limit: usize,
    entries: HashMap<ConnectionId, Connection>,
}

impl ConnectionTable {
    pub(crate) fn new(limit: usize) -> Self {
        Self { next: 1, limit, entries: HashMap::new() }
    }

    pub(crate) fn attach(&mut self, pid: ProcessId, chid: ChannelId) -> Result<ConnectionId> {
        if self.entries.len() >= self.limit {
            return Err(IpcError::ResourceExhausted(Resource::Connections));
        }
        let raw = self.next;
        self.next = raw.checked_add(1).ok_or(IpcError::ResourceExhausted(Resource::Connections))?;
        let coid = ConnectionId::from_raw(raw);
        self.entries.insert(
            coid,
            Connection { pid, chid, state: ConnectionState::Open, gate: Arc::new(SendGate::new()) },
        );
        Ok(coid)
    }

    /// Removes `coid`; returns whether it existed.
    pub(crate) fn detach(&mut self, coid: ConnectionId) -> bool {
        self.entries.remove(&coid).is_some()
    }

    pub(crate) fn route(&self, coid: ConnectionId) -> Result<Route> {
        let connection = self.entries.get(&coid).ok_or(IpcError::NotFound)?;
        if connection.state == ConnectionState::Broken {
            return Err(IpcError::PeerGone);
        }
        Ok(Route { pid: connection.pid, chid: connection.chid, gate: Arc::clone(&connection.gate) })
    }

    pub(crate) fn state(&self, coid: ConnectionId) -> Result<ConnectionState> {
        self.entries.get(&coid).map(|connection| connection.state).ok_or(IpcError::NotFound)
    }

    pub(crate) fn mark_broken(&mut self, coid: ConnectionId) {
        if let Some(connection) = self.entries.get_mut(&coid) {
            connection.state = ConnectionState::Broken;
        }
    }

    /// Breaks every connection into `pid` (restricted to `chid` when given).
    pub(crate) fn break_target(&mut self, pid: ProcessId, chid: Option<ChannelId>) -> usize {
        let mut broken = 0;
        for connection in self.entries.values_mut() {
            let hit = connection.pid == pid && chid.map_or(true, |chid| connection.chid == chid);
            if hit && connection.state == ConnectionState::Open {
                connection.state = ConnectionState::Broken;
                broken += 1;
            }
        }
        broken
    }

    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}

#[derive(Default)]
struct GateState {
    active: bool,
    next_ticket: u64,
    waiting: VecDeque<u64>,
}

/// Admits one send at a time per connection, in arrival order.
pub(crate) struct SendGate {
    state: Mutex<GateState>,
    turn: Condvar,
}

/// Held while a send is in flight; releases the gate on drop.
pub(crate) struct GatePass {
    gate: Arc<SendGate>,
}

impl Drop for GatePass {
    fn drop(&mut self) {
        self.gate.state.lock().active = false;
        self.gate.turn.notify_all();
    }
}

impl SendGate {
    fn new() -> Self {
        Self { state: Mutex::new(GateState::default()), turn: Condvar::new() }
    }

    pub(crate) fn enter(
        self: &Arc<Self>,
        policy: SendPolicy,
        deadline: Option<Instant>,
        non_blocking: bool,
    ) -> Result<GatePass> {
        let mut state = self.state.lock();
        if !state.active && state.waiting.is_empty() {
            state.active = true;
            return Ok(GatePass { gate: Arc::clone(self) });
        }
        match policy {
            SendPolicy::RejectBusy => return Err(IpcError::Busy),
            SendPolicy::Serialize if non_blocking => return Err(IpcError::WouldBlock),
            SendPolicy::Serialize => {}
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiting.push_back(ticket);
        loop {
            if !state.active && state.waiting.front() == Some(&ticket) {
                state.waiting.pop_front();
                state.active = true;
                return Ok(GatePass { gate: Arc::clone(self) });
            }
            let timed_out = match deadline {
                None => {
                    self.turn.wait(&mut state);
                    false
                }
                Some(at) => self.turn.wait_until(&mut state, at).timed_out(),
            };
            if timed_out && (state.active || state.waiting.front() != Some(&ticket)) {
                state.waiting.retain(|queued| *queued != ticket);
                // The next ticket may now be at the front.
                self.turn.notify_all();
                return Err(IpcError::Timeout);
            }
        }
    }
}
