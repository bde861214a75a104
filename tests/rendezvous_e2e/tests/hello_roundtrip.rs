//! CONTEXT: hellod end-to-end tests across processes of one kernel
//! INTENT: Validate HELLO/ECHO/fault flows and teardown through the public runtime API
//! DEPS: hellod (service integration), nexus-rendezvous
//! TESTS: Greeting ok, echo ok, unknown type faults, concurrent clients, server termination
// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::thread;

use hellod::{ECHO, GREETING, HELLO, RESPONSE};
use nexus_rendezvous::{
    call, CallError, ClientSession, Envelope, IpcError, Kernel, RendezvousConfig, Wait,
};
use nexus_rendezvous_e2e::spawn_hellod;

#[test]
fn greeting_roundtrip() {
    let kernel = Kernel::default();
    let hellod = spawn_hellod(&kernel);
    let client = kernel.spawn();

    let reply = call(
        &client,
        hellod.process.pid(),
        hellod.chid,
        &Envelope::new(HELLO, GREETING.as_bytes()),
        Wait::Blocking,
    )
    .unwrap();
    assert_eq!(reply.ty(), HELLO);
    assert_eq!(reply.payload(), RESPONSE.as_bytes());

    let stats = hellod.shutdown();
    assert_eq!(stats.served, 1);
}

#[test]
fn echo_and_fault_share_one_session() {
    let kernel = Kernel::default();
    let hellod = spawn_hellod(&kernel);
    let client = kernel.spawn();
    let session = ClientSession::open(&client, hellod.process.pid(), hellod.chid).unwrap();

    let echoed = session.send(&Envelope::new(ECHO, b"payload".to_vec()), Wait::Blocking).unwrap();
    assert_eq!(echoed.payload(), b"payload");

    let err = session.send(&Envelope::new(77, Vec::new()), Wait::Blocking).unwrap_err();
    assert_eq!(err, CallError::Fault("unsupported request type 77".to_string()));

    drop(session);
    let stats = hellod.shutdown();
    assert_eq!(stats.served, 2);
    assert_eq!(stats.faults, 0);
}

#[test]
fn concurrent_clients_each_get_a_reply() {
    const CLIENTS: u32 = 6;
    let kernel = Kernel::default();
    let hellod = spawn_hellod(&kernel);
    let server_pid = hellod.process.pid();
    let chid = hellod.chid;

    let clients: Vec<_> = (0..CLIENTS)
        .map(|i| {
            let client = kernel.spawn();
            thread::spawn(move || {
                let request = Envelope::new(ECHO, format!("client-{i}").into_bytes());
                let reply = call(&client, server_pid, chid, &request, Wait::Blocking).unwrap();
                assert_eq!(reply, request);
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    assert_eq!(hellod.shutdown().served, u64::from(CLIENTS));
}

#[test]
fn terminated_server_fails_later_calls() {
    let kernel = Kernel::new(RendezvousConfig { call_timeout_ms: Some(2_000), ..Default::default() });
    let hellod = spawn_hellod(&kernel);
    let client = kernel.spawn();
    let session = ClientSession::open(&client, hellod.process.pid(), hellod.chid).unwrap();
    assert!(session.send(&Envelope::new(HELLO, Vec::new()), Wait::Blocking).is_ok());

    kernel.terminate(hellod.process.pid()).unwrap();
    let loop_result = hellod.handle.join().unwrap();
    assert!(matches!(loop_result, Ok(_) | Err(IpcError::Terminated)));

    let err = session.send(&Envelope::new(HELLO, Vec::new()), kernel.config().default_wait());
    assert_eq!(err.unwrap_err(), CallError::Ipc(IpcError::PeerGone));
}
