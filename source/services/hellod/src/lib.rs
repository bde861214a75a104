// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: hellod reference service built on the rendezvous runtime
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + CLI integration test
//!
//! PROTOCOL:
//!   - HELLO (1): replies `{1, "Hello from the server!"}`
//!   - ECHO (2): replies with the request unchanged
//!   - any other type: fault envelope naming the type

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use std::thread;

use log::info;
use nexus_rendezvous::{
    call, serve, CallError, ConfigError, Envelope, Handler, IpcError, Kernel, RendezvousConfig,
    ServeStats,
};
use thiserror::Error;

pub mod cli;

/// Greeting request type.
pub const HELLO: u32 = 1;
/// Echo request type.
pub const ECHO: u32 = 2;
/// Payload the demo client sends.
pub const GREETING: &str = "Hello, Server!";
/// Payload of every HELLO reply.
pub const RESPONSE: &str = "Hello from the server!";

/// Errors surfaced by the demo run.
#[derive(Debug, Error)]
pub enum DemoError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Runtime operation failed.
    #[error("ipc error: {0}")]
    Ipc(#[from] IpcError),
    /// Client call failed.
    #[error("call failed: {0}")]
    Call(#[from] CallError),
    /// A demo thread died outside the handler.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
    /// Command line could not be parsed.
    #[error("{0}")]
    Usage(String),
}

/// Request handler implementing the hellod protocol.
#[derive(Debug)]
pub struct HelloService {
    max_payload: usize,
}

impl HelloService {
    /// Creates a handler whose faults fit within `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Handler for HelloService {
    fn handle(&mut self, request: &Envelope) -> Envelope {
        match request.ty() {
            HELLO => {
                info!("hellod: greeting ({} bytes)", request.payload().len());
                Envelope::new(HELLO, RESPONSE.as_bytes())
            }
            ECHO => request.clone(),
            other => Envelope::fault(&format!("unsupported request type {other}"), self.max_payload),
        }
    }
}

/// Result of one demo exchange.
#[derive(Debug)]
pub struct DemoOutcome {
    /// Reply payload as text.
    pub reply: String,
    /// Statistics of the server loop.
    pub stats: ServeStats,
}

/// Runs a server thread and a client thread in one process and exchanges a HELLO.
pub fn run_demo(config: RendezvousConfig) -> Result<DemoOutcome, DemoError> {
    let wait = config.default_wait();
    let max_payload = config.max_payload;
    let kernel = Kernel::new(config);
    let process = kernel.spawn();
    let chid = process.create_channel()?;
    info!("hellod: {} serving {chid}", process.pid());

    let server = {
        let process = process.clone();
        thread::spawn(move || serve(&process, chid, &mut HelloService::new(max_payload)))
    };
    let client = {
        let process = process.clone();
        thread::spawn(move || {
            let request = Envelope::new(HELLO, GREETING.as_bytes());
            call(&process, process.pid(), chid, &request, wait)
        })
    };

    let reply = client.join().map_err(|_| DemoError::ThreadPanicked("client"));
    // Tear the channel down even when the client failed so the server thread exits.
    process.destroy_channel(chid)?;
    let stats = server.join().map_err(|_| DemoError::ThreadPanicked("server"))??;
    let reply = reply??;
    Ok(DemoOutcome { reply: String::from_utf8_lossy(reply.payload()).into_owned(), stats })
}
