// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process authority owning processes, channel registries and connection tables
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests + integration tests under tests/
//!
//! PUBLIC API:
//!   - Kernel::new/spawn/process/terminate
//!   - Process: create_channel, destroy_channel, attach, detach, send, call, receive, reply,
//!     abort, channel_info, connection_state
//!
//! LOCK ORDER:
//!   - kernel process table -> process registry / connection table -> channel
//!   - a channel lock is never held while taking a registry or table lock
//!
//! ERROR CONDITIONS:
//!   - IpcError::NotFound: unknown process, channel or connection
//!   - IpcError::PeerGone: connection target no longer exists
//!   - IpcError::Terminated: operation through a handle of a terminated process

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::config::RendezvousConfig;
use crate::connection::{ConnectionState, ConnectionTable};
use crate::engine::{deadline_after, Channel, ChannelInfo};
use crate::registry::ChannelRegistry;
use crate::{
    ChannelId, Client, ConnectionId, Envelope, IpcError, ProcessId, ReceiveId, Result, Server,
    Wait,
};

/// Authority through which processes create channels and reach each other.
///
/// Cloning is cheap; every clone refers to the same process table.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

struct KernelInner {
    config: RendezvousConfig,
    next_pid: AtomicU32,
    processes: Mutex<HashMap<ProcessId, Arc<ProcessEntry>>>,
}

struct ProcessEntry {
    pid: ProcessId,
    alive: AtomicBool,
    channels: Mutex<ChannelRegistry>,
    connections: Mutex<ConnectionTable>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new(RendezvousConfig::default())
    }
}

impl Kernel {
    /// Creates an empty kernel using `config` for every process.
    pub fn new(config: RendezvousConfig) -> Self {
        Self {
            inner: Arc::new(KernelInner {
                config,
                next_pid: AtomicU32::new(1),
                processes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Configuration shared by every process.
    pub fn config(&self) -> &RendezvousConfig {
        &self.inner.config
    }

    /// Registers a new process and returns its handle.
    pub fn spawn(&self) -> Process {
        let config = &self.inner.config;
        let pid = ProcessId::from_raw(self.inner.next_pid.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(ProcessEntry {
            pid,
            alive: AtomicBool::new(true),
            channels: Mutex::new(ChannelRegistry::new(pid, config.max_channels, config.max_payload)),
            connections: Mutex::new(ConnectionTable::new(config.max_connections)),
        });
        self.inner.processes.lock().insert(pid, Arc::clone(&entry));
        debug!("rendezvous: spawned {pid}");
        Process { kernel: Arc::clone(&self.inner), entry }
    }

    /// Returns a handle to a live process.
    pub fn process(&self, pid: ProcessId) -> Option<Process> {
        self.inner
            .lookup(pid)
            .map(|entry| Process { kernel: Arc::clone(&self.inner), entry })
    }

    /// Number of live processes.
    pub fn process_count(&self) -> usize {
        self.inner.processes.lock().len()
    }

    /// Terminates `pid`: closes its channels, breaks connections into it, aborts calls it has
    /// queued elsewhere and drops its connection table.
    pub fn terminate(&self, pid: ProcessId) -> Result<()> {
        let entry = self.inner.processes.lock().remove(&pid).ok_or(IpcError::NotFound)?;
        entry.alive.store(false, Ordering::Release);

        let channels = entry.channels.lock().drain();
        for channel in &channels {
            channel.close();
        }
        let broken = self.inner.break_connections(pid, None);

        let mut aborted = 0;
        for survivor in self.inner.snapshot() {
            let survivor_channels = survivor.channels.lock().snapshot();
            for channel in survivor_channels {
                aborted += channel.abort_sender(pid);
            }
        }
        let dropped = entry.connections.lock().clear();
        info!(
            "rendezvous: terminated {pid} ({} channels closed, {broken} connections broken, \
             {aborted} outbound calls aborted, {dropped} connections dropped)",
            channels.len()
        );
        Ok(())
    }
}

impl KernelInner {
    fn lookup(&self, pid: ProcessId) -> Option<Arc<ProcessEntry>> {
        self.processes.lock().get(&pid).cloned()
    }

    fn snapshot(&self) -> Vec<Arc<ProcessEntry>> {
        self.processes.lock().values().cloned().collect()
    }

    fn resolve(&self, pid: ProcessId, chid: ChannelId) -> Option<Arc<Channel>> {
        let target = self.lookup(pid)?;
        let channel = target.channels.lock().get(chid);
        channel
    }

    fn break_connections(&self, pid: ProcessId, chid: Option<ChannelId>) -> usize {
        self.snapshot()
            .iter()
            .map(|entry| entry.connections.lock().break_target(pid, chid))
            .sum()
    }
}

/// Handle to one process registered with a [`Kernel`].
///
/// Clones share the same process, so threads of one process each hold a clone.
#[derive(Clone)]
pub struct Process {
    kernel: Arc<KernelInner>,
    entry: Arc<ProcessEntry>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.entry.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl Process {
    /// Identifier of this process.
    pub fn pid(&self) -> ProcessId {
        self.entry.pid
    }

    /// Returns `false` once the process has been terminated.
    pub fn is_alive(&self) -> bool {
        self.entry.alive.load(Ordering::Acquire)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(IpcError::Terminated)
        }
    }

    /// Creates a channel owned by this process.
    pub fn create_channel(&self) -> Result<ChannelId> {
        let mut channels = self.entry.channels.lock();
        // Checked under the registry lock so termination's drain cannot miss the new channel.
        self.ensure_alive()?;
        let chid = channels.create()?;
        drop(channels);
        debug!("rendezvous: {} created {chid}", self.pid());
        Ok(chid)
    }

    /// Destroys `chid`, failing every party waiting on it and breaking connections into it.
    pub fn destroy_channel(&self, chid: ChannelId) -> Result<()> {
        self.ensure_alive()?;
        let channel = self.entry.channels.lock().remove(chid)?;
        let (aborted, receivers) = channel.close();
        let broken = self.kernel.break_connections(self.pid(), Some(channel.id()));
        debug!(
            "rendezvous: {} destroyed {chid} ({aborted} calls aborted, {receivers} receivers \
             woken, {broken} connections broken)",
            self.pid()
        );
        Ok(())
    }

    /// Snapshot of the queues of a channel owned by this process.
    pub fn channel_info(&self, chid: ChannelId) -> Result<ChannelInfo> {
        let channel = self.entry.channels.lock().get(chid).ok_or(IpcError::NotFound)?;
        Ok(channel.info())
    }

    /// Attaches to `chid` owned by `pid`. The existence check is point-in-time only.
    pub fn attach(&self, pid: ProcessId, chid: ChannelId) -> Result<ConnectionId> {
        self.ensure_alive()?;
        let target = self.kernel.lookup(pid).ok_or(IpcError::NotFound)?;
        if !target.channels.lock().contains(chid) {
            return Err(IpcError::NotFound);
        }
        let mut connections = self.entry.connections.lock();
        self.ensure_alive()?;
        let coid = connections.attach(pid, chid)?;
        drop(connections);
        debug!("rendezvous: {} attached {coid} -> {pid}/{chid}", self.pid());
        Ok(coid)
    }

    /// Releases `coid`. Unknown or already detached connections are ignored.
    pub fn detach(&self, coid: ConnectionId) {
        if self.entry.connections.lock().detach(coid) {
            debug!("rendezvous: {} detached {coid}", self.pid());
        }
    }

    /// Last observed state of `coid`.
    pub fn connection_state(&self, coid: ConnectionId) -> Result<ConnectionState> {
        self.entry.connections.lock().state(coid)
    }

    /// Sends `request` over `coid` and blocks until the reply arrives.
    ///
    /// `Wait::NonBlocking` refuses with `WouldBlock` unless a receiver is already blocked on
    /// the target channel; once paired the reply is awaited with the configured default wait.
    pub fn send(&self, coid: ConnectionId, request: &Envelope, wait: Wait) -> Result<Envelope> {
        self.ensure_alive()?;
        let route = self.entry.connections.lock().route(coid)?;
        let (non_blocking, effective) = if wait.is_non_blocking() {
            (true, self.kernel.config.default_wait())
        } else {
            (false, wait)
        };
        let deadline = deadline_after(effective);
        let _pass = route.gate.enter(self.kernel.config.send_policy, deadline, non_blocking)?;

        // Liveness is re-validated on every send rather than trusted from attach time.
        let Some(channel) = self.kernel.resolve(route.pid, route.chid) else {
            self.entry.connections.lock().mark_broken(coid);
            return Err(IpcError::PeerGone);
        };
        let result = channel.send(
            self.pid(),
            coid,
            &self.entry.alive,
            request,
            deadline,
            non_blocking,
        );
        // An explicit abort also reports PeerGone; only a vanished target breaks the link.
        if result == Err(IpcError::PeerGone) && self.kernel.resolve(route.pid, route.chid).is_none()
        {
            self.entry.connections.lock().mark_broken(coid);
        }
        result
    }

    /// [`Process::send`] with the configured default wait.
    pub fn call(&self, coid: ConnectionId, request: &Envelope) -> Result<Envelope> {
        self.send(coid, request, self.kernel.config.default_wait())
    }

    /// Receives the oldest request queued on `chid`.
    pub fn receive(&self, chid: ChannelId, wait: Wait) -> Result<(ReceiveId, Envelope)> {
        self.ensure_alive()?;
        let channel = self.entry.channels.lock().get(chid).ok_or(IpcError::NotFound)?;
        let (call, request) = channel.receive(deadline_after(wait), wait.is_non_blocking())?;
        Ok((ReceiveId::new(chid, call), request))
    }

    /// Replies to the sender behind `rid`. Never blocks.
    pub fn reply(&self, rid: ReceiveId, reply: &Envelope) -> Result<()> {
        self.ensure_alive()?;
        self.answer_channel(rid)?.reply(rid.call(), reply)
    }

    /// Fails the sender behind `rid` with `PeerGone`.
    pub fn abort(&self, rid: ReceiveId) -> Result<()> {
        self.ensure_alive()?;
        self.answer_channel(rid)?.abort(rid.call())
    }

    fn answer_channel(&self, rid: ReceiveId) -> Result<Arc<Channel>> {
        self.entry.channels.lock().get(rid.channel()).ok_or(IpcError::InvalidHandle)
    }
}

impl Client for Process {
    fn attach(&self, pid: ProcessId, chid: ChannelId) -> Result<ConnectionId> {
        Process::attach(self, pid, chid)
    }

    fn detach(&self, coid: ConnectionId) {
        Process::detach(self, coid)
    }

    fn send(&self, coid: ConnectionId, request: &Envelope, wait: Wait) -> Result<Envelope> {
        Process::send(self, coid, request, wait)
    }
}

impl Server for Process {
    fn create_channel(&self) -> Result<ChannelId> {
        Process::create_channel(self)
    }

    fn destroy_channel(&self, chid: ChannelId) -> Result<()> {
        Process::destroy_channel(self, chid)
    }

    fn receive(&self, chid: ChannelId, wait: Wait) -> Result<(ReceiveId, Envelope)> {
        Process::receive(self, chid, wait)
    }

    fn reply(&self, rid: ReceiveId, reply: &Envelope) -> Result<()> {
        Process::reply(self, rid, reply)
    }

    fn abort(&self, rid: ReceiveId) -> Result<()> {
        Process::abort(self, rid)
    }

    fn max_payload(&self) -> usize {
        self.kernel.config.max_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resource;
    use std::thread;

    fn hello() -> Envelope {
        Envelope::new(1, b"Hello, Server!".to_vec())
    }

    #[test]
    fn pids_are_unique() {
        let kernel = Kernel::default();
        let a = kernel.spawn();
        let b = kernel.spawn();
        assert_ne!(a.pid(), b.pid());
        assert_eq!(kernel.process_count(), 2);
        assert_eq!(kernel.process(a.pid()).unwrap().pid(), a.pid());
    }

    #[test]
    fn attach_requires_existing_channel() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let client = kernel.spawn();
        assert_eq!(client.attach(server.pid(), ChannelId::from_raw(1)), Err(IpcError::NotFound));
        assert_eq!(
            client.attach(ProcessId::from_raw(99), ChannelId::from_raw(1)),
            Err(IpcError::NotFound)
        );
        let chid = server.create_channel().unwrap();
        assert!(client.attach(server.pid(), chid).is_ok());
    }

    #[test]
    fn channel_limit_from_config() {
        let kernel = Kernel::new(RendezvousConfig { max_channels: 1, ..Default::default() });
        let server = kernel.spawn();
        server.create_channel().unwrap();
        assert_eq!(
            server.create_channel(),
            Err(IpcError::ResourceExhausted(Resource::Channels))
        );
    }

    #[test]
    fn destroy_unknown_channel_is_not_found() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        assert_eq!(server.destroy_channel(ChannelId::from_raw(7)), Err(IpcError::NotFound));
    }

    #[test]
    fn destroy_breaks_connections_and_send_fails() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let client = kernel.spawn();
        let chid = server.create_channel().unwrap();
        let coid = client.attach(server.pid(), chid).unwrap();
        server.destroy_channel(chid).unwrap();
        assert_eq!(client.connection_state(coid), Ok(ConnectionState::Broken));
        assert_eq!(client.send(coid, &hello(), Wait::Blocking), Err(IpcError::PeerGone));
        client.detach(coid);
        client.detach(coid);
        assert_eq!(client.connection_state(coid), Err(IpcError::NotFound));
    }

    #[test]
    fn send_on_unknown_connection_is_not_found() {
        let kernel = Kernel::default();
        let client = kernel.spawn();
        assert_eq!(
            client.send(ConnectionId::from_raw(5), &hello(), Wait::Blocking),
            Err(IpcError::NotFound)
        );
    }

    #[test]
    fn reply_with_foreign_handle_is_invalid() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let other = kernel.spawn();
        let chid = server.create_channel().unwrap();
        let coid = server.attach(server.pid(), chid).unwrap();
        let sender = {
            let server = server.clone();
            thread::spawn(move || server.send(coid, &hello(), Wait::Blocking))
        };
        let (rid, _) = server.receive(chid, Wait::Blocking).unwrap();
        assert_eq!(other.reply(rid, &hello()), Err(IpcError::InvalidHandle));
        server.reply(rid, &Envelope::new(1, b"ok".to_vec())).unwrap();
        assert_eq!(sender.join().unwrap().unwrap().payload(), b"ok");
    }

    #[test]
    fn oversized_reply_keeps_call_pending() {
        let kernel = Kernel::default();
        let server = kernel.spawn();
        let chid = server.create_channel().unwrap();
        let coid = server.attach(server.pid(), chid).unwrap();
        let sender = {
            let server = server.clone();
            thread::spawn(move || server.send(coid, &hello(), Wait::Blocking))
        };
        let (rid, _) = server.receive(chid, Wait::Blocking).unwrap();
        let err = server.reply(rid, &Envelope::new(1, vec![0u8; 101])).unwrap_err();
        assert!(matches!(err, IpcError::MalformedMessage(_)));
        server.abort(rid).unwrap();
        assert_eq!(sender.join().unwrap(), Err(IpcError::PeerGone));
    }

    #[test]
    fn terminated_handle_rejects_everything() {
        let kernel = Kernel::default();
        let process = kernel.spawn();
        let chid = process.create_channel().unwrap();
        kernel.terminate(process.pid()).unwrap();
        assert!(!process.is_alive());
        assert!(kernel.process(process.pid()).is_none());
        assert_eq!(process.create_channel(), Err(IpcError::Terminated));
        assert_eq!(process.receive(chid, Wait::NonBlocking), Err(IpcError::Terminated));
        assert_eq!(kernel.terminate(process.pid()), Err(IpcError::NotFound));
    }
}
