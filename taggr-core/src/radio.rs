//! Radio transport capability.
//!
//! The core never talks to a radio stack directly. A platform adapter
//! implements [`Radio`] and feeds [`RadioEvent`]s back into the session on
//! one serial execution context. Commands are fire-and-forget: their effects
//! are observed only through later events, and no ordering between a command
//! and an already-queued event may be assumed. Every handler therefore
//! re-validates current state before mutating anything.

use taggr_proto::CharacteristicDef;
use uuid::Uuid;

/// Opaque handle for a discovered peer, assigned by the platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle(pub u64);

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Signal strength in dBm, reported alongside each discovery event.
pub type Rssi = i16;

/// Power/authorization state of the radio capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    /// True when commands can be issued and postures held.
    pub fn is_usable(self) -> bool {
        self == RadioState::PoweredOn
    }

    /// True when the capability cannot recover without outside intervention.
    pub fn is_terminal(self) -> bool {
        matches!(self, RadioState::Unsupported | RadioState::Unauthorized)
    }
}

/// Token identifying one incoming ATT read/write request, to be answered via
/// [`Radio::respond_to_write`] / [`Radio::respond_to_read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttRequest(pub u64);

/// Outcome reported back to a writer at the ATT level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttResult {
    Success,
    Failed,
}

/// Commands the core issues against the radio. All fire-and-forget.
///
/// `start_advertising` publishes the service (with its characteristics) and
/// begins advertising it; `stop_advertising` removes the published service
/// again. The scanning pair behaves the same way for the central role.
pub trait Radio {
    fn start_advertising(&mut self, service: Uuid, characteristics: &[CharacteristicDef]);
    fn stop_advertising(&mut self);
    fn start_scanning(&mut self, service: Uuid, allow_duplicates: bool);
    fn stop_scanning(&mut self);
    fn connect(&mut self, peer: PeerHandle);
    fn cancel_connection(&mut self, peer: PeerHandle);
    fn discover_services(&mut self, peer: PeerHandle, services: &[Uuid]);
    fn discover_characteristics(&mut self, peer: PeerHandle, service: Uuid, characteristics: &[Uuid]);
    fn write_characteristic(&mut self, peer: PeerHandle, characteristic: Uuid, value: &[u8], ack_required: bool);
    fn read_characteristic(&mut self, peer: PeerHandle, characteristic: Uuid);
    fn subscribe_notifications(&mut self, peer: PeerHandle, characteristic: Uuid);
    fn respond_to_write(&mut self, request: AttRequest, result: AttResult);
    fn respond_to_read(&mut self, request: AttRequest, value: Option<Vec<u8>>);
    fn notify_subscribers(&mut self, characteristic: Uuid, value: &[u8]);
}

/// Events delivered by the platform adapter, in arrival order, on the one
/// serial context that owns the session.
#[derive(Debug, Clone)]
pub enum RadioEvent {
    StateChanged(RadioState),
    Discovered { peer: PeerHandle, rssi: Rssi },
    Connected { peer: PeerHandle },
    ConnectFailed { peer: PeerHandle },
    Disconnected { peer: PeerHandle },
    ServicesDiscovered { peer: PeerHandle, services: Vec<Uuid> },
    CharacteristicsDiscovered { peer: PeerHandle, service: Uuid, characteristics: Vec<Uuid> },
    WriteCompleted { peer: PeerHandle, characteristic: Uuid, success: bool },
    ValueUpdated { peer: PeerHandle, characteristic: Uuid, value: Vec<u8> },
    IncomingWrite { request: AttRequest, characteristic: Uuid, value: Vec<u8> },
    IncomingRead { request: AttRequest, characteristic: Uuid },
    SubscriberAttached { characteristic: Uuid },
    SubscriberDetached { characteristic: Uuid },
}
