//! Signal-strength gate for discovered peers.

use crate::peer::{ConnectionState, PeerRecord};
use crate::radio::Rssi;

/// Decides whether a discovered peer is close enough (and new enough) to act
/// on. Deterministic and side-effect-free for equal inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityPolicy {
    /// Minimum acceptable signal strength; `None` accepts any reading.
    pub threshold: Option<Rssi>,
}

impl ProximityPolicy {
    /// Group formation wants physical co-presence: -80 dBm and closer.
    pub const GROUP_FORMATION: ProximityPolicy = ProximityPolicy { threshold: Some(-80) };

    /// In-game tag scanning accepts any discoverable contact.
    pub const TAG_SCAN: ProximityPolicy = ProximityPolicy { threshold: None };

    /// Accept or reject a discovery. Peers with a connection already in
    /// flight are rejected regardless of signal strength, so one peer never
    /// collects duplicate connection attempts.
    pub fn accept(&self, rssi: Rssi, record: Option<&PeerRecord>) -> bool {
        if let Some(min) = self.threshold {
            if rssi < min {
                return false;
            }
        }
        match record.map(|r| r.connection_state) {
            Some(
                ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::ServiceDiscovered,
            ) => false,
            _ => true,
        }
    }
}
