//! Per-peer connection records.

use std::collections::HashMap;

use tracing::debug;

use crate::radio::{PeerHandle, Rssi};

/// Where a peer sits in the connect → discover pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Discovered,
    Connecting,
    Connected,
    ServiceDiscovered,
    Disconnected,
}

/// Which of the two session identifiers have been delivered to this peer
/// (initiator-side bookkeeping during bootstrap).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributesReceived {
    pub service: bool,
    pub characteristic: bool,
}

impl AttributesReceived {
    pub fn complete(self) -> bool {
        self.service && self.characteristic
    }
}

/// One discovered peer. Created on first discovery, updated on every
/// discovery/connection event, removed on disconnect or teardown.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub handle: PeerHandle,
    pub last_rssi: Rssi,
    pub connection_state: ConnectionState,
    pub attributes_received: AttributesReceived,
}

/// The set of peers a protocol is currently tracking.
#[derive(Debug, Default)]
pub struct PeerTable {
    records: HashMap<PeerHandle, PeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert on a discovery event. A known peer keeps its connection state;
    /// only the signal strength is refreshed.
    pub fn observe_discovery(&mut self, handle: PeerHandle, rssi: Rssi) -> &mut PeerRecord {
        self.records
            .entry(handle)
            .and_modify(|r| r.last_rssi = rssi)
            .or_insert_with(|| PeerRecord {
                handle,
                last_rssi: rssi,
                connection_state: ConnectionState::Discovered,
                attributes_received: AttributesReceived::default(),
            })
    }

    pub fn get(&self, handle: PeerHandle) -> Option<&PeerRecord> {
        self.records.get(&handle)
    }

    pub fn get_mut(&mut self, handle: PeerHandle) -> Option<&mut PeerRecord> {
        self.records.get_mut(&handle)
    }

    pub fn set_state(&mut self, handle: PeerHandle, state: ConnectionState) {
        match self.records.get_mut(&handle) {
            Some(record) => record.connection_state = state,
            None => debug!(%handle, "state change for untracked peer dropped"),
        }
    }

    pub fn remove(&mut self, handle: PeerHandle) -> Option<PeerRecord> {
        self.records.remove(&handle)
    }

    /// Peers that completed the link (Connected or further).
    pub fn connected(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values().filter(|r| {
            matches!(
                r.connection_state,
                ConnectionState::Connected | ConnectionState::ServiceDiscovered
            )
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.values()
    }

    pub fn handles(&self) -> Vec<PeerHandle> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
