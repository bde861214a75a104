// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous channel-based rendezvous IPC (send / receive / reply)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + integration tests under tests/
//!
//! PUBLIC API:
//!   - Kernel: authority owning every process, channel registry and connection table
//!   - Process: per-process handle implementing [`Client`] and [`Server`]
//!   - Client / Server traits: the seam the loop and call helpers are written against
//!   - serve(): receive -> handle -> reply loop with panic conversion
//!   - ClientSession / call(): attach -> send -> detach helpers
//!   - RendezvousConfig: limits, payload bound, timeout and send policy
//!
//! INVARIANTS:
//!   - Per-channel FIFO pairing of senders to receivers
//!   - A reply reaches exactly the sender whose request produced the receive id
//!   - Destroying a channel or terminating a process never leaves a party blocked
//!
//! DEPENDENCIES:
//!   - parking_lot: per-channel mutex + condvar wake-ups
//!   - nexus-envelope: bounded wire codec
//!   - log: lifecycle diagnostics

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::fmt;
use core::time::Duration;

pub use nexus_envelope::{Envelope, EnvelopeError};

pub mod client;
pub mod config;
mod connection;
mod engine;
pub mod kernel;
mod registry;
pub mod server;

pub use client::{call, CallError, ClientSession};
pub use config::{ConfigError, RendezvousConfig, SendPolicy};
pub use connection::ConnectionState;
pub use engine::{CallState, ChannelInfo};
pub use kernel::{Kernel, Process};
pub use server::{serve, Handler, ServeStats};

/// Result type returned by IPC operations.
pub type Result<T> = core::result::Result<T, IpcError>;

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Registry limit that was hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// Per-process channel limit.
    Channels,
    /// Per-process connection limit.
    Connections,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channels => f.write_str("channels"),
            Self::Connections => f.write_str("connections"),
        }
    }
}

/// Errors produced by the rendezvous runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    /// Referenced process, channel or connection does not exist.
    #[error("not found")]
    NotFound,
    /// Channel was destroyed while the caller waited on it.
    #[error("channel closed")]
    Closed,
    /// Counterparty channel or process went away mid-call.
    #[error("peer gone")]
    PeerGone,
    /// Connection already carries an in-flight call.
    #[error("connection busy")]
    Busy,
    /// The caller exceeded the requested timeout.
    #[error("operation timed out")]
    Timeout,
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// Receive id is unknown, already answered or cancelled.
    #[error("invalid receive handle")]
    InvalidHandle,
    /// Envelope failed validation.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] EnvelopeError),
    /// A registry limit was reached.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Resource),
    /// The calling process has been terminated.
    #[error("process terminated")]
    Terminated,
}

/// Kernel-assigned process identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

/// Channel identifier, unique within the owning process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(u32);

/// Connection identifier, unique within the connecting process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u32);

macro_rules! raw_id {
    ($ty:ident, $prefix:literal) => {
        impl $ty {
            /// Wraps a raw identifier value.
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            /// Exposes the raw numeric value.
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

raw_id!(ProcessId, "pid");
raw_id!(ChannelId, "chid");
raw_id!(ConnectionId, "coid");

/// Correlation handle returned by `receive` and consumed by `reply`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReceiveId {
    channel: ChannelId,
    call: u64,
}

impl ReceiveId {
    pub(crate) const fn new(channel: ChannelId, call: u64) -> Self {
        Self { channel, call }
    }

    /// Channel the request was received on.
    pub const fn channel(self) -> ChannelId {
        self.channel
    }

    pub(crate) const fn call(self) -> u64 {
        self.call
    }
}

impl fmt::Display for ReceiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rcvid:{}.{}", self.channel.0, self.call)
    }
}

/// Client side of the rendezvous protocol.
pub trait Client {
    /// Connects to channel `chid` owned by `pid`.
    fn attach(&self, pid: ProcessId, chid: ChannelId) -> Result<ConnectionId>;

    /// Releases a connection. Detaching an unknown connection is a no-op.
    fn detach(&self, coid: ConnectionId);

    /// Sends `request` and blocks until the matching reply arrives.
    fn send(&self, coid: ConnectionId, request: &Envelope, wait: Wait) -> Result<Envelope>;
}

/// Server side of the rendezvous protocol.
pub trait Server {
    /// Creates a channel owned by the caller.
    fn create_channel(&self) -> Result<ChannelId>;

    /// Destroys a channel, failing every party still waiting on it.
    fn destroy_channel(&self, chid: ChannelId) -> Result<()>;

    /// Receives the oldest queued request on `chid`.
    fn receive(&self, chid: ChannelId, wait: Wait) -> Result<(ReceiveId, Envelope)>;

    /// Delivers `reply` to the sender behind `rid`.
    fn reply(&self, rid: ReceiveId, reply: &Envelope) -> Result<()>;

    /// Fails the sender behind `rid` without a reply.
    fn abort(&self, rid: ReceiveId) -> Result<()>;

    /// Largest payload accepted by this server.
    fn max_payload(&self) -> usize;
}
