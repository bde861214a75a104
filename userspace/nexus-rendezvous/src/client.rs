// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Client-side helpers: scoped connections and one-shot calls.

use thiserror::Error;

use crate::{ChannelId, Client, ConnectionId, Envelope, IpcError, ProcessId, Wait};

/// Failure of a client call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Transport level failure.
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    /// Server answered with a fault envelope.
    #[error("server fault: {0}")]
    Fault(String),
}

/// Connection that is detached again when the session is dropped.
pub struct ClientSession<'a, C: Client + ?Sized> {
    client: &'a C,
    coid: ConnectionId,
}

impl<'a, C: Client + ?Sized> ClientSession<'a, C> {
    /// Attaches `client` to channel `chid` of process `pid`.
    pub fn open(client: &'a C, pid: ProcessId, chid: ChannelId) -> Result<Self, IpcError> {
        let coid = client.attach(pid, chid)?;
        Ok(Self { client, coid })
    }

    /// Underlying connection id.
    pub fn connection(&self) -> ConnectionId {
        self.coid
    }

    /// Sends `request` and returns the reply, surfacing fault envelopes as errors.
    pub fn send(&self, request: &Envelope, wait: Wait) -> Result<Envelope, CallError> {
        let reply = self.client.send(self.coid, request, wait)?;
        if reply.is_fault() {
            return Err(CallError::Fault(String::from_utf8_lossy(reply.payload()).into_owned()));
        }
        Ok(reply)
    }
}

impl<C: Client + ?Sized> Drop for ClientSession<'_, C> {
    fn drop(&mut self) {
        self.client.detach(self.coid);
    }
}

/// Attaches, sends one request and detaches.
pub fn call<C: Client + ?Sized>(
    client: &C,
    pid: ProcessId,
    chid: ChannelId,
    request: &Envelope,
    wait: Wait,
) -> Result<Envelope, CallError> {
    ClientSession::open(client, pid, chid)?.send(request, wait)
}
