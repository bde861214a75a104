// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process channel registry.
//!
//! Channel ids start at 1 and grow monotonically; a destroyed id is never handed out again,
//! so a stale [`crate::ReceiveId`] or connection can never alias a newer channel.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::engine::Channel;
use crate::{ChannelId, IpcError, ProcessId, Resource, Result};

pub(crate) struct ChannelRegistry {
    owner: ProcessId,
    next: u32,
    limit: usize,
    max_payload: usize,
    channels: BTreeMap<ChannelId, Arc<Channel>>,
}

impl ChannelRegistry {
    pub(crate) fn new(owner: ProcessId, limit: usize, max_payload: usize) -> Self {
        Self { owner, next: 1, limit, max_payload, channels: BTreeMap::new() }
    }

    pub(crate) fn create(&mut self) -> Result<ChannelId> {
        if self.channels.len() >= self.limit {
            return Err(IpcError::ResourceExhausted(Resource::Channels));
        }
        let raw = self.next;
        self.next = raw.checked_add(1).ok_or(IpcError::ResourceExhausted(Resource::Channels))?;
        let chid = ChannelId::from_raw(raw);
        self.channels.insert(chid, Arc::new(Channel::new(chid, self.owner, self.max_payload)));
        Ok(chid)
    }

    pub(crate) fn remove(&mut self, chid: ChannelId) -> Result<Arc<Channel>> {
        self.channels.remove(&chid).ok_or(IpcError::NotFound)
    }

    pub(crate) fn get(&self, chid: ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(&chid).cloned()
    }

    pub(crate) fn contains(&self, chid: ChannelId) -> bool {
        self.channels.contains_key(&chid)
    }

    /// Clones out every live channel so callers can work on them without holding the registry.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels.values().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<Channel>> {
        std::mem::take(&mut self.channels).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(limit: usize) -> ChannelRegistry {
        ChannelRegistry::new(ProcessId::from_raw(1), limit, 100)
    }

    #[test]
    fn first_channel_is_one() {
        let mut registry = registry(4);
        assert_eq!(registry.create().unwrap(), ChannelId::from_raw(1));
        assert_eq!(registry.create().unwrap(), ChannelId::from_raw(2));
    }

    #[test]
    fn limit_reports_exhaustion() {
        let mut registry = registry(1);
        registry.create().unwrap();
        assert_eq!(registry.create(), Err(IpcError::ResourceExhausted(Resource::Channels)));
    }

    #[test]
    fn destroyed_ids_are_not_reused() {
        let mut registry = registry(1);
        let first = registry.create().unwrap();
        registry.remove(first).unwrap();
        let second = registry.create().unwrap();
        assert_ne!(first, second);
        assert!(!registry.contains(first));
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut registry = registry(1);
        assert!(matches!(registry.remove(ChannelId::from_raw(9)), Err(IpcError::NotFound)));
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = registry(4);
        let chid = registry.create().unwrap();
        registry.create().unwrap();
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id(), chid);
        assert!(registry.snapshot().is_empty());
        assert!(registry.get(chid).is_none());
    }
}
