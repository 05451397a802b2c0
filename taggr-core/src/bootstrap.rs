//! Group bootstrap: converge an ad-hoc set of nearby devices on one session
//! attribute pair and elect the device that starts marked.
//!
//! The initiator generates the session attributes, scans for joiners and
//! configures each over the fixed bootstrap characteristics. Joiners
//! advertise the bootstrap service, accept the two identifier writes, and
//! publish a ready flag. Once every connected joiner is ready the initiator
//! draws the starter and pushes the verdict to every joiner.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use taggr_proto::{
    BOOTSTRAP_SERVICE_UUID, CHOSEN_STARTER_UUID, READY_UUID, SessionAttributes,
    TAG_CHARACTERISTIC_ID_UUID, TAG_SERVICE_ID_UUID, bootstrap_characteristics, wire,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::peer::{ConnectionState, PeerTable};
use crate::proximity::ProximityPolicy;
use crate::radio::{AttRequest, AttResult, PeerHandle, Radio, RadioEvent};
use crate::tag::Role;

/// Which device was elected to begin the game marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Starter {
    Initiator,
    Joiner(PeerHandle),
}

/// Transient bootstrap view; discarded once the starter is resolved.
#[derive(Debug)]
pub struct GroupSnapshot {
    pub initiator: bool,
    pub ready_peers: HashSet<PeerHandle>,
    pub all_peers: HashSet<PeerHandle>,
    pub chosen_starter: Option<Starter>,
}

/// What a handled event meant for the group, surfaced to the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BootstrapProgress {
    PeerJoined { connected: usize },
    PeerReady { ready: usize, connected: usize },
    Complete { attributes: SessionAttributes, role: Role },
}

#[derive(Debug)]
enum Mode {
    Initiator {
        attributes: SessionAttributes,
        /// Joiners in connect order; the starter draw indexes into this.
        join_order: Vec<PeerHandle>,
        /// Verdict writes still awaiting their ack.
        pending_verdicts: HashSet<PeerHandle>,
        /// Our own role once the draw has happened.
        own_role: Option<Role>,
        rng: StdRng,
    },
    Joiner {
        service_id: Option<Uuid>,
        characteristic_id: Option<Uuid>,
        ready: bool,
    },
}

/// Map a draw from `[0, N]` inclusive onto a starter. Draw `N` elects the
/// initiator itself; any other draw elects the joiner at that index.
pub fn starter_for_draw(draw: usize, joiners: &[PeerHandle]) -> Starter {
    if draw == joiners.len() { Starter::Initiator } else { Starter::Joiner(joiners[draw]) }
}

/// One bootstrap attempt. Lives from group creation/join until the starter
/// verdict lands, then hands its attributes and initial role to the game.
#[derive(Debug)]
pub struct GroupBootstrap {
    mode: Mode,
    snapshot: GroupSnapshot,
    peers: PeerTable,
    policy: ProximityPolicy,
}

impl GroupBootstrap {
    /// Create a group: generate fresh session attributes and treat this
    /// device as already configured.
    pub fn initiator() -> Self {
        Self::initiator_with(SessionAttributes::generate(), StdRng::from_entropy())
    }

    /// Initiator with pinned attributes and RNG, for deterministic tests.
    pub fn initiator_with(attributes: SessionAttributes, rng: StdRng) -> Self {
        Self {
            mode: Mode::Initiator {
                attributes,
                join_order: Vec::new(),
                pending_verdicts: HashSet::new(),
                own_role: None,
                rng,
            },
            snapshot: GroupSnapshot {
                initiator: true,
                ready_peers: HashSet::new(),
                all_peers: HashSet::new(),
                chosen_starter: None,
            },
            peers: PeerTable::new(),
            policy: ProximityPolicy::GROUP_FORMATION,
        }
    }

    /// Join a group: advertise the bootstrap service and wait to be
    /// configured.
    pub fn joiner() -> Self {
        Self {
            mode: Mode::Joiner { service_id: None, characteristic_id: None, ready: false },
            snapshot: GroupSnapshot {
                initiator: false,
                ready_peers: HashSet::new(),
                all_peers: HashSet::new(),
                chosen_starter: None,
            },
            peers: PeerTable::new(),
            policy: ProximityPolicy::GROUP_FORMATION,
        }
    }

    pub fn snapshot(&self) -> &GroupSnapshot {
        &self.snapshot
    }

    /// Take (or retake) the bootstrap radio posture.
    pub fn assume_posture<R: Radio>(&mut self, radio: &mut R) {
        match self.mode {
            Mode::Initiator { .. } => radio.start_scanning(BOOTSTRAP_SERVICE_UUID, false),
            Mode::Joiner { .. } => {
                radio.start_advertising(BOOTSTRAP_SERVICE_UUID, &bootstrap_characteristics())
            }
        }
    }

    /// Drop postures and live connections without resolving the group.
    pub fn halt<R: Radio>(&mut self, radio: &mut R) {
        radio.stop_scanning();
        radio.stop_advertising();
        for handle in self.peers.handles() {
            radio.cancel_connection(handle);
        }
        self.peers.clear();
    }

    pub fn handle_event<R: Radio>(
        &mut self,
        radio: &mut R,
        event: &RadioEvent,
    ) -> Option<BootstrapProgress> {
        if matches!(self.mode, Mode::Initiator { .. }) {
            self.initiator_event(radio, event)
        } else {
            self.joiner_event(radio, event)
        }
    }

    // =========================================================================
    // Initiator side (central role)
    // =========================================================================

    fn initiator_event<R: Radio>(
        &mut self,
        radio: &mut R,
        event: &RadioEvent,
    ) -> Option<BootstrapProgress> {
        match event {
            RadioEvent::Discovered { peer, rssi } => {
                if !self.policy.accept(*rssi, self.peers.get(*peer)) {
                    debug!(peer = %peer, rssi, "joiner rejected by proximity filter");
                    return None;
                }
                let record = self.peers.observe_discovery(*peer, *rssi);
                record.connection_state = ConnectionState::Connecting;
                radio.connect(*peer);
                None
            }
            RadioEvent::Connected { peer } => {
                if self.peers.get(*peer).is_none() {
                    debug!(peer = %peer, "connect for untracked joiner dropped");
                    return None;
                }
                self.peers.set_state(*peer, ConnectionState::Connected);
                self.snapshot.all_peers.insert(*peer);
                if let Mode::Initiator { join_order, .. } = &mut self.mode {
                    if !join_order.contains(peer) {
                        join_order.push(*peer);
                    }
                }
                radio.discover_services(*peer, &[BOOTSTRAP_SERVICE_UUID]);
                Some(BootstrapProgress::PeerJoined { connected: self.snapshot.all_peers.len() })
            }
            RadioEvent::ServicesDiscovered { peer, services } => {
                if !self.snapshot.all_peers.contains(peer) {
                    return None;
                }
                if !services.contains(&BOOTSTRAP_SERVICE_UUID) {
                    warn!(peer = %peer, "bootstrap service missing, dropping joiner");
                    self.drop_joiner(radio, *peer, true);
                    return None;
                }
                radio.discover_characteristics(
                    *peer,
                    BOOTSTRAP_SERVICE_UUID,
                    &[TAG_SERVICE_ID_UUID, TAG_CHARACTERISTIC_ID_UUID, READY_UUID, CHOSEN_STARTER_UUID],
                );
                None
            }
            RadioEvent::CharacteristicsDiscovered { peer, characteristics, .. } => {
                if !self.snapshot.all_peers.contains(peer) {
                    return None;
                }
                let required =
                    [TAG_SERVICE_ID_UUID, TAG_CHARACTERISTIC_ID_UUID, READY_UUID, CHOSEN_STARTER_UUID];
                if required.iter().any(|c| !characteristics.contains(c)) {
                    warn!(peer = %peer, "joiner is missing bootstrap characteristics");
                    self.drop_joiner(radio, *peer, true);
                    return None;
                }
                self.peers.set_state(*peer, ConnectionState::ServiceDiscovered);
                let attributes = match &self.mode {
                    Mode::Initiator { attributes, .. } => *attributes,
                    Mode::Joiner { .. } => unreachable!(),
                };
                radio.write_characteristic(
                    *peer,
                    TAG_SERVICE_ID_UUID,
                    &wire::encode_uuid(attributes.service),
                    true,
                );
                radio.write_characteristic(
                    *peer,
                    TAG_CHARACTERISTIC_ID_UUID,
                    &wire::encode_uuid(attributes.characteristic),
                    true,
                );
                radio.subscribe_notifications(*peer, READY_UUID);
                None
            }
            RadioEvent::WriteCompleted { peer, characteristic, success } => {
                self.on_initiator_write_completed(radio, *peer, *characteristic, *success)
            }
            RadioEvent::ValueUpdated { peer, characteristic, value } => {
                if *characteristic != READY_UUID {
                    return None;
                }
                if !self.snapshot.all_peers.contains(peer) {
                    debug!(peer = %peer, "ready update from untracked peer dropped");
                    return None;
                }
                match wire::decode_flag(value) {
                    Ok(true) => {
                        // set semantics keep duplicate notifications harmless
                        self.snapshot.ready_peers.insert(*peer);
                    }
                    Ok(false) => return None,
                    Err(err) => {
                        warn!(peer = %peer, %err, "malformed ready value dropped");
                        return None;
                    }
                }
                let progress = BootstrapProgress::PeerReady {
                    ready: self.snapshot.ready_peers.len(),
                    connected: self.snapshot.all_peers.len(),
                };
                self.maybe_select(radio);
                Some(progress)
            }
            RadioEvent::ConnectFailed { peer } | RadioEvent::Disconnected { peer } => {
                debug!(peer = %peer, "joiner connection lost");
                self.drop_joiner(radio, *peer, false);
                self.finish_if_settled(radio)
            }
            _ => None,
        }
    }

    fn on_initiator_write_completed<R: Radio>(
        &mut self,
        radio: &mut R,
        peer: PeerHandle,
        characteristic: Uuid,
        success: bool,
    ) -> Option<BootstrapProgress> {
        if characteristic == TAG_SERVICE_ID_UUID || characteristic == TAG_CHARACTERISTIC_ID_UUID {
            if !success {
                warn!(peer = %peer, "session identifier write failed, dropping joiner");
                self.drop_joiner(radio, peer, true);
                return None;
            }
            if let Some(record) = self.peers.get_mut(peer) {
                if characteristic == TAG_SERVICE_ID_UUID {
                    record.attributes_received.service = true;
                } else {
                    record.attributes_received.characteristic = true;
                }
                if record.attributes_received.complete() {
                    debug!(peer = %peer, "joiner holds both session identifiers");
                }
            }
            return None;
        }
        if characteristic == CHOSEN_STARTER_UUID {
            if !success {
                // nothing left to retry against; the joiner will sit out
                warn!(peer = %peer, "starter verdict write failed");
            }
            if let Mode::Initiator { pending_verdicts, .. } = &mut self.mode {
                pending_verdicts.remove(&peer);
            }
            return self.finish_if_settled(radio);
        }
        None
    }

    /// Run starter selection once every connected joiner is ready. With no
    /// joiners connected this keeps waiting; bootstrap has no timeout.
    fn maybe_select<R: Radio>(&mut self, radio: &mut R) {
        if self.snapshot.chosen_starter.is_some() {
            return;
        }
        if self.snapshot.all_peers.is_empty()
            || self.snapshot.ready_peers.len() != self.snapshot.all_peers.len()
        {
            return;
        }
        let Mode::Initiator { join_order, pending_verdicts, own_role, rng, .. } = &mut self.mode
        else {
            return;
        };
        let n = join_order.len();
        let draw = rng.gen_range(0..=n);
        let starter = starter_for_draw(draw, join_order);
        info!(draw, joiners = n, ?starter, "starter selected");

        for peer in join_order.iter() {
            let elected = starter == Starter::Joiner(*peer);
            radio.write_characteristic(*peer, CHOSEN_STARTER_UUID, &wire::encode_flag(elected), true);
            pending_verdicts.insert(*peer);
        }
        *own_role = Some(if starter == Starter::Initiator { Role::Marked } else { Role::Seeker });
        self.snapshot.chosen_starter = Some(starter);
    }

    /// Complete once the draw happened and every verdict write resolved.
    fn finish_if_settled<R: Radio>(&mut self, radio: &mut R) -> Option<BootstrapProgress> {
        let Mode::Initiator { attributes, pending_verdicts, own_role, .. } = &self.mode else {
            return None;
        };
        let role = (*own_role)?;
        if !pending_verdicts.is_empty() {
            return None;
        }
        let attributes = *attributes;
        radio.stop_scanning();
        for handle in self.peers.handles() {
            radio.cancel_connection(handle);
        }
        self.peers.clear();
        info!(?role, "bootstrap complete");
        Some(BootstrapProgress::Complete { attributes, role })
    }

    fn drop_joiner<R: Radio>(&mut self, radio: &mut R, peer: PeerHandle, cancel: bool) {
        if cancel {
            radio.cancel_connection(peer);
        }
        self.peers.remove(peer);
        self.snapshot.all_peers.remove(&peer);
        self.snapshot.ready_peers.remove(&peer);
        if let Mode::Initiator { join_order, pending_verdicts, .. } = &mut self.mode {
            join_order.retain(|p| *p != peer);
            pending_verdicts.remove(&peer);
        }
    }

    // =========================================================================
    // Joiner side (peripheral role)
    // =========================================================================

    fn joiner_event<R: Radio>(
        &mut self,
        radio: &mut R,
        event: &RadioEvent,
    ) -> Option<BootstrapProgress> {
        match event {
            RadioEvent::IncomingWrite { request, characteristic, value } => {
                self.on_joiner_write(radio, *request, *characteristic, value)
            }
            RadioEvent::IncomingRead { request, characteristic } => {
                self.on_joiner_read(radio, *request, *characteristic);
                None
            }
            RadioEvent::SubscriberAttached { characteristic } => {
                // late subscribers get the current flag immediately
                if *characteristic == READY_UUID {
                    if let Mode::Joiner { ready, .. } = &self.mode {
                        radio.notify_subscribers(READY_UUID, &wire::encode_flag(*ready));
                    }
                }
                None
            }
            _ => {
                debug!("event outside the joiner protocol dropped");
                None
            }
        }
    }

    fn on_joiner_write<R: Radio>(
        &mut self,
        radio: &mut R,
        request: AttRequest,
        characteristic: Uuid,
        value: &[u8],
    ) -> Option<BootstrapProgress> {
        let Mode::Joiner { service_id, characteristic_id, ready } = &mut self.mode else {
            return None;
        };
        if characteristic == TAG_SERVICE_ID_UUID || characteristic == TAG_CHARACTERISTIC_ID_UUID {
            let id = match wire::decode_uuid(value) {
                Ok(id) => id,
                Err(err) => {
                    warn!(%err, "malformed identifier write refused");
                    radio.respond_to_write(request, AttResult::Failed);
                    return None;
                }
            };
            if characteristic == TAG_SERVICE_ID_UUID {
                *service_id = Some(id);
            } else {
                *characteristic_id = Some(id);
            }
            radio.respond_to_write(request, AttResult::Success);

            // configured only once both identifiers arrived at least once
            if service_id.is_some() && characteristic_id.is_some() && !*ready {
                *ready = true;
                info!("session attributes received, ready");
                radio.notify_subscribers(READY_UUID, &wire::encode_flag(true));
            }
            return None;
        }
        if characteristic == CHOSEN_STARTER_UUID {
            // a verdict only makes sense once both identifiers are in
            let (Some(service), Some(chr)) = (*service_id, *characteristic_id) else {
                warn!("starter verdict before configuration refused");
                radio.respond_to_write(request, AttResult::Failed);
                return None;
            };
            let elected = match wire::decode_flag(value) {
                Ok(flag) => flag,
                Err(err) => {
                    warn!(%err, "malformed starter verdict refused");
                    radio.respond_to_write(request, AttResult::Failed);
                    return None;
                }
            };
            let attributes = SessionAttributes { service, characteristic: chr };
            radio.respond_to_write(request, AttResult::Success);
            radio.stop_advertising();
            let role = if elected { Role::Marked } else { Role::Seeker };
            info!(?role, "bootstrap complete");
            return Some(BootstrapProgress::Complete { attributes, role });
        }
        debug!(%characteristic, "write to unexpected characteristic refused");
        radio.respond_to_write(request, AttResult::Failed);
        None
    }

    fn on_joiner_read<R: Radio>(&mut self, radio: &mut R, request: AttRequest, characteristic: Uuid) {
        let Mode::Joiner { service_id, characteristic_id, ready } = &self.mode else {
            return;
        };
        let value = if characteristic == READY_UUID {
            Some(wire::encode_flag(*ready).to_vec())
        } else if characteristic == TAG_SERVICE_ID_UUID {
            service_id.map(wire::encode_uuid)
        } else if characteristic == TAG_CHARACTERISTIC_ID_UUID {
            characteristic_id.map(wire::encode_uuid)
        } else {
            None
        };
        radio.respond_to_read(request, value);
    }
}
