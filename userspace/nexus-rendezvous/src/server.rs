// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Receive -> handle -> reply loop shared by every rendezvous service.
//!
//! A panicking handler never leaves its sender blocked: the panic is caught and the sender
//! receives a fault envelope (type [`nexus_envelope::FAULT_TYPE`]) carrying the reason.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::{error, info, warn};

use crate::{ChannelId, Envelope, IpcError, Result, Server, Wait};

/// Produces one reply per request.
pub trait Handler {
    /// Handles `request` and returns the reply envelope.
    fn handle(&mut self, request: &Envelope) -> Envelope;
}

impl<F> Handler for F
where
    F: FnMut(&Envelope) -> Envelope,
{
    fn handle(&mut self, request: &Envelope) -> Envelope {
        self(request)
    }
}

/// Counters reported once the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServeStats {
    /// Replies delivered, fault replies included.
    pub served: u64,
    /// Handler panics converted into fault replies.
    pub faults: u64,
    /// Calls aborted because the reply could not be delivered.
    pub aborted: u64,
    /// Replies dropped because the sender had already given up.
    pub stale: u64,
}

/// Serves `chid` until it is destroyed.
///
/// Returns the loop statistics when the channel closes; any other receive failure is
/// propagated.
pub fn serve<S, H>(server: &S, chid: ChannelId, handler: &mut H) -> Result<ServeStats>
where
    S: Server + ?Sized,
    H: Handler + ?Sized,
{
    let mut stats = ServeStats::default();
    info!("rendezvous: serving {chid}");
    loop {
        let (rid, request) = match server.receive(chid, Wait::Blocking) {
            Ok(received) => received,
            Err(IpcError::Closed | IpcError::NotFound) => {
                info!("rendezvous: {chid} closed, loop exiting ({stats:?})");
                return Ok(stats);
            }
            Err(err) => {
                error!("rendezvous: receive on {chid} failed: {err}");
                return Err(err);
            }
        };

        let reply = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&request))) {
            Ok(reply) => reply,
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!("rendezvous: handler panicked on {rid}: {reason}");
                stats.faults += 1;
                Envelope::fault(&reason, server.max_payload())
            }
        };

        match server.reply(rid, &reply) {
            Ok(()) => stats.served += 1,
            Err(IpcError::InvalidHandle) => {
                warn!("rendezvous: {rid} no longer pending, reply dropped");
                stats.stale += 1;
            }
            Err(IpcError::MalformedMessage(err)) => {
                warn!("rendezvous: reply to {rid} rejected ({err}), aborting call");
                match server.abort(rid) {
                    Ok(()) => stats.aborted += 1,
                    Err(IpcError::InvalidHandle) => stats.stale += 1,
                    Err(err) => return Err(err),
                }
            }
            Err(err) => {
                error!("rendezvous: reply to {rid} failed: {err}");
                return Err(err);
            }
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Kernel;
    use std::thread;

    #[test]
    fn panic_reason_extracts_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_reason(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(payload.as_ref()), "handler panicked");
    }

    #[test]
    fn loop_exits_when_channel_destroyed() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let chid = server.create_channel().unwrap();
        let worker = {
            let server = server.clone();
            thread::spawn(move || {
                let mut echo = |request: &Envelope| request.clone();
                serve(&server, chid, &mut echo)
            })
        };
        let coid = server.attach(server.pid(), chid).unwrap();
        let reply = server.send(coid, &Envelope::new(2, b"hi".to_vec()), Wait::Blocking).unwrap();
        assert_eq!(reply.payload(), b"hi");

        server.destroy_channel(chid).unwrap();
        let stats = worker.join().unwrap().unwrap();
        assert_eq!(stats.served, 1);
        assert_eq!(stats.faults, 0);
    }

    #[test]
    fn oversized_reply_aborts_sender() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let chid = server.create_channel().unwrap();
        let worker = {
            let server = server.clone();
            thread::spawn(move || {
                let mut bloat = |_: &Envelope| Envelope::new(1, vec![0u8; 500]);
                serve(&server, chid, &mut bloat)
            })
        };
        let coid = server.attach(server.pid(), chid).unwrap();
        assert_eq!(
            server.send(coid, &Envelope::new(1, Vec::new()), Wait::Blocking),
            Err(IpcError::PeerGone)
        );
        server.destroy_channel(chid).unwrap();
        let stats = worker.join().unwrap().unwrap();
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.served, 0);
    }
}
