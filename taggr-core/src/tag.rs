//! The tag state machine: seeker vs. marked.
//!
//! Exactly one instance per device once a game is running. The machine owns
//! the current role and drives the matching radio posture: a seeker scans
//! for the session service and connects, a marked device advertises it and
//! accepts the tag write. Both sides converge only through the handshake,
//! never through shared state.

use serde::{Deserialize, Serialize};
use taggr_proto::{CharacteristicDef, CharacteristicProps, SessionAttributes, wire};
use tracing::{debug, info, warn};

use crate::peer::{ConnectionState, PeerTable};
use crate::proximity::ProximityPolicy;
use crate::radio::{AttRequest, AttResult, PeerHandle, Radio, RadioEvent, Rssi};
use crate::store::DeviceIdentity;

/// The two wireless roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Scans for and connects to the marked peer.
    Seeker,
    /// Advertises itself and accepts incoming connections.
    Marked,
}

/// The machine's complete state. Persisted across transitions so a restarted
/// process rejoins mid-game; `target_peer` is connection-scoped and never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleState {
    pub role: Role,
    #[serde(skip)]
    pub target_peer: Option<PeerHandle>,
    pub attributes: SessionAttributes,
}

fn session_characteristic(attributes: &SessionAttributes) -> [CharacteristicDef; 1] {
    [CharacteristicDef {
        uuid: attributes.characteristic,
        props: CharacteristicProps { read: true, write: true, notify: false },
    }]
}

/// Drives role transitions and the tag handshake.
#[derive(Debug)]
pub struct TagMachine {
    state: RoleState,
    identity: DeviceIdentity,
    peers: PeerTable,
    policy: ProximityPolicy,
}

impl TagMachine {
    pub fn new(identity: DeviceIdentity, attributes: SessionAttributes, role: Role) -> Self {
        Self {
            state: RoleState { role, target_peer: None, attributes },
            identity,
            peers: PeerTable::new(),
            policy: ProximityPolicy::TAG_SCAN,
        }
    }

    pub fn role(&self) -> Role {
        self.state.role
    }

    pub fn state(&self) -> &RoleState {
        &self.state
    }

    pub fn attributes(&self) -> SessionAttributes {
        self.state.attributes
    }

    /// Assume the radio posture for the current role without changing it.
    /// Used at game start, after reattachment, and when the radio powers
    /// back on.
    pub fn enter<R: Radio>(&mut self, radio: &mut R) {
        match self.state.role {
            Role::Seeker => {
                radio.start_scanning(self.state.attributes.service, true);
            }
            Role::Marked => {
                radio.start_advertising(
                    self.state.attributes.service,
                    &session_characteristic(&self.state.attributes),
                );
            }
        }
    }

    /// Drop both postures without touching the role. The role's posture is
    /// re-established by [`enter`](Self::enter) once the radio recovers.
    pub fn halt<R: Radio>(&mut self, radio: &mut R) {
        radio.stop_scanning();
        radio.stop_advertising();
        if let Some(target) = self.state.target_peer.take() {
            radio.cancel_connection(target);
        }
        self.peers.clear();
    }

    /// Switch roles. Idempotent: re-applying the current role is a no-op, so
    /// redelivered events cannot double-issue radio commands.
    pub fn transition<R: Radio>(&mut self, radio: &mut R, new_role: Role) -> bool {
        if self.state.role == new_role {
            debug!(?new_role, "transition to current role ignored");
            return false;
        }
        match new_role {
            Role::Marked => {
                radio.stop_scanning();
                if let Some(target) = self.state.target_peer.take() {
                    radio.cancel_connection(target);
                }
                self.peers.clear();
                radio.start_advertising(
                    self.state.attributes.service,
                    &session_characteristic(&self.state.attributes),
                );
            }
            Role::Seeker => {
                radio.stop_advertising();
                radio.start_scanning(self.state.attributes.service, true);
            }
        }
        self.state.role = new_role;
        info!(?new_role, "role transition");
        true
    }

    /// Feed one radio event through the machine. Returns the new role when
    /// the event completed a tag in either direction.
    pub fn handle_event<R: Radio>(&mut self, radio: &mut R, event: &RadioEvent) -> Option<Role> {
        match event {
            RadioEvent::Discovered { peer, rssi } => {
                self.on_discovered(radio, *peer, *rssi);
                None
            }
            RadioEvent::Connected { peer } => {
                self.on_connected(radio, *peer);
                None
            }
            RadioEvent::ConnectFailed { peer } => {
                self.on_connection_lost(radio, *peer, "connect failed");
                None
            }
            RadioEvent::Disconnected { peer } => {
                self.on_connection_lost(radio, *peer, "disconnected");
                None
            }
            RadioEvent::ServicesDiscovered { peer, services } => {
                self.on_services_discovered(radio, *peer, services);
                None
            }
            RadioEvent::CharacteristicsDiscovered { peer, characteristics, .. } => {
                self.on_characteristics_discovered(radio, *peer, characteristics);
                None
            }
            RadioEvent::WriteCompleted { peer, characteristic, success } => {
                self.on_write_completed(radio, *peer, *characteristic, *success)
            }
            RadioEvent::IncomingWrite { request, characteristic, value } => {
                self.on_incoming_write(radio, *request, *characteristic, value)
            }
            RadioEvent::IncomingRead { request, characteristic } => {
                self.on_incoming_read(radio, *request, *characteristic);
                None
            }
            // marked devices do not care who subscribes; nothing is notified
            // over the session characteristic
            _ => None,
        }
    }

    fn on_discovered<R: Radio>(&mut self, radio: &mut R, peer: PeerHandle, rssi: Rssi) {
        if self.state.role != Role::Seeker {
            debug!(%peer, "discovery after leaving Seeker dropped");
            return;
        }
        if self.state.target_peer.is_some() {
            // a connection attempt is already in flight; first one wins
            return;
        }
        if !self.policy.accept(rssi, self.peers.get(peer)) {
            return;
        }
        let record = self.peers.observe_discovery(peer, rssi);
        record.connection_state = ConnectionState::Connecting;
        self.state.target_peer = Some(peer);
        debug!(%peer, rssi, "connecting to marked peer");
        radio.connect(peer);
    }

    fn on_connected<R: Radio>(&mut self, radio: &mut R, peer: PeerHandle) {
        if self.state.role != Role::Seeker || self.state.target_peer != Some(peer) {
            debug!(%peer, "stale connect dropped");
            return;
        }
        self.peers.set_state(peer, ConnectionState::Connected);
        // handshake window: neither posture is active until the write
        // resolves one way or the other
        radio.stop_scanning();
        radio.discover_services(peer, &[self.state.attributes.service]);
    }

    fn on_services_discovered<R: Radio>(
        &mut self,
        radio: &mut R,
        peer: PeerHandle,
        services: &[uuid::Uuid],
    ) {
        if self.state.role != Role::Seeker || self.state.target_peer != Some(peer) {
            return;
        }
        if !services.contains(&self.state.attributes.service) {
            warn!(%peer, "session service missing on connected peer");
            self.abandon_target(radio, peer);
            return;
        }
        radio.discover_characteristics(
            peer,
            self.state.attributes.service,
            &[self.state.attributes.characteristic],
        );
    }

    fn on_characteristics_discovered<R: Radio>(
        &mut self,
        radio: &mut R,
        peer: PeerHandle,
        characteristics: &[uuid::Uuid],
    ) {
        if self.state.role != Role::Seeker || self.state.target_peer != Some(peer) {
            return;
        }
        if !characteristics.contains(&self.state.attributes.characteristic) {
            warn!(%peer, "session characteristic missing on connected peer");
            self.abandon_target(radio, peer);
            return;
        }
        self.peers.set_state(peer, ConnectionState::ServiceDiscovered);
        // the tag itself: announce our identity and require an ack
        radio.write_characteristic(
            peer,
            self.state.attributes.characteristic,
            &wire::encode_uuid(self.identity.as_uuid()),
            true,
        );
    }

    fn on_write_completed<R: Radio>(
        &mut self,
        radio: &mut R,
        peer: PeerHandle,
        characteristic: uuid::Uuid,
        success: bool,
    ) -> Option<Role> {
        if self.state.role != Role::Seeker
            || self.state.target_peer != Some(peer)
            || characteristic != self.state.attributes.characteristic
        {
            debug!(%peer, "stale write completion dropped");
            return None;
        }
        if !success {
            // success is defined only by the ack; fall back to scanning
            warn!(%peer, "tag write failed, rescanning");
            self.abandon_target(radio, peer);
            return None;
        }
        info!(%peer, "tagged peer, becoming marked");
        self.transition(radio, Role::Marked);
        Some(Role::Marked)
    }

    fn on_incoming_write<R: Radio>(
        &mut self,
        radio: &mut R,
        request: AttRequest,
        characteristic: uuid::Uuid,
        value: &[u8],
    ) -> Option<Role> {
        if characteristic != self.state.attributes.characteristic {
            debug!(%characteristic, "write to unknown characteristic dropped");
            radio.respond_to_write(request, AttResult::Failed);
            return None;
        }
        if self.state.role != Role::Marked {
            // redelivery after we already flipped away; refusing the ack
            // keeps the writer seeking instead of minting a second marked
            debug!("tag write while not marked refused");
            radio.respond_to_write(request, AttResult::Failed);
            return None;
        }
        let tagger = match wire::decode_uuid(value) {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, "malformed tag write refused");
                radio.respond_to_write(request, AttResult::Failed);
                return None;
            }
        };
        info!(%tagger, "tagged, becoming seeker");
        radio.respond_to_write(request, AttResult::Success);
        self.transition(radio, Role::Seeker);
        Some(Role::Seeker)
    }

    fn on_incoming_read<R: Radio>(
        &mut self,
        radio: &mut R,
        request: AttRequest,
        characteristic: uuid::Uuid,
    ) {
        if characteristic != self.state.attributes.characteristic {
            radio.respond_to_read(request, None);
            return;
        }
        // the characteristic doubles as the marked-status signal
        let marked = self.state.role == Role::Marked;
        radio.respond_to_read(request, Some(wire::encode_flag(marked).to_vec()));
    }

    fn on_connection_lost<R: Radio>(&mut self, radio: &mut R, peer: PeerHandle, what: &str) {
        self.peers.remove(peer);
        if self.state.role == Role::Seeker && self.state.target_peer == Some(peer) {
            debug!(%peer, what, "target lost, rescanning");
            self.state.target_peer = None;
            radio.start_scanning(self.state.attributes.service, true);
        }
    }

    fn abandon_target<R: Radio>(&mut self, radio: &mut R, peer: PeerHandle) {
        self.state.target_peer = None;
        self.peers.remove(peer);
        radio.cancel_connection(peer);
        radio.start_scanning(self.state.attributes.service, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemStore, RecordingRadio};

    fn machine(role: Role) -> TagMachine {
        let mut store = MemStore::default();
        let identity = DeviceIdentity::load_or_create(&mut store).unwrap();
        TagMachine::new(identity, SessionAttributes::generate(), role)
    }

    #[test]
    fn transition_to_marked_is_idempotent() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Seeker);

        assert!(m.transition(&mut radio, Role::Marked));
        let after_first = (radio.advertising, radio.scanning, m.role());

        assert!(!m.transition(&mut radio, Role::Marked));
        assert_eq!(after_first, (radio.advertising, radio.scanning, m.role()));
    }

    #[test]
    fn postures_are_exclusive_across_transitions() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Seeker);
        m.enter(&mut radio);
        assert!(radio.scanning.is_some() && radio.advertising.is_none());

        m.transition(&mut radio, Role::Marked);
        assert!(radio.scanning.is_none() && radio.advertising.is_some());

        m.transition(&mut radio, Role::Seeker);
        assert!(radio.scanning.is_some() && radio.advertising.is_none());
    }

    #[test]
    fn stale_discovery_after_role_change_mutates_nothing() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Seeker);
        m.enter(&mut radio);
        m.transition(&mut radio, Role::Marked);
        radio.commands.clear();

        m.handle_event(&mut radio, &RadioEvent::Discovered { peer: PeerHandle(9), rssi: -30 });

        assert!(radio.commands.is_empty());
        assert!(m.state().target_peer.is_none());
        assert_eq!(m.role(), Role::Marked);
    }

    #[test]
    fn target_lock_ignores_later_discoveries() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Seeker);
        m.enter(&mut radio);

        m.handle_event(&mut radio, &RadioEvent::Discovered { peer: PeerHandle(1), rssi: -40 });
        m.handle_event(&mut radio, &RadioEvent::Discovered { peer: PeerHandle(2), rssi: -20 });

        assert_eq!(m.state().target_peer, Some(PeerHandle(1)));
        assert_eq!(radio.connects, vec![PeerHandle(1)]);
    }

    #[test]
    fn failed_write_falls_back_to_scanning() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Seeker);
        m.enter(&mut radio);
        let peer = PeerHandle(1);
        m.handle_event(&mut radio, &RadioEvent::Discovered { peer, rssi: -40 });
        m.handle_event(&mut radio, &RadioEvent::Connected { peer });

        let attrs = m.attributes();
        m.handle_event(
            &mut radio,
            &RadioEvent::WriteCompleted { peer, characteristic: attrs.characteristic, success: false },
        );

        assert_eq!(m.role(), Role::Seeker);
        assert!(m.state().target_peer.is_none());
        assert!(radio.scanning.is_some());
    }

    #[test]
    fn duplicate_tag_write_is_refused_after_flip() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Marked);
        m.enter(&mut radio);
        let attrs = m.attributes();
        let payload = wire::encode_uuid(uuid::Uuid::new_v4());

        let first = m.handle_event(
            &mut radio,
            &RadioEvent::IncomingWrite {
                request: AttRequest(1),
                characteristic: attrs.characteristic,
                value: payload.clone(),
            },
        );
        assert_eq!(first, Some(Role::Seeker));
        assert_eq!(radio.write_responses.last(), Some(&(AttRequest(1), AttResult::Success)));

        // redelivery of the same write after the flip
        let second = m.handle_event(
            &mut radio,
            &RadioEvent::IncomingWrite {
                request: AttRequest(2),
                characteristic: attrs.characteristic,
                value: payload,
            },
        );
        assert_eq!(second, None);
        assert_eq!(radio.write_responses.last(), Some(&(AttRequest(2), AttResult::Failed)));
        assert_eq!(m.role(), Role::Seeker);
    }

    #[test]
    fn marked_status_read_reports_flag() {
        let mut radio = RecordingRadio::default();
        let mut m = machine(Role::Marked);
        let attrs = m.attributes();

        m.handle_event(
            &mut radio,
            &RadioEvent::IncomingRead { request: AttRequest(5), characteristic: attrs.characteristic },
        );

        assert_eq!(
            radio.read_responses.last(),
            Some(&(AttRequest(5), Some(vec![taggr_proto::FLAG_SET])))
        );
    }
}
