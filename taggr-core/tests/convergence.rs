//! End-to-end convergence: several sessions wired through an in-process
//! radio bus that models discovery, connections, ATT writes and
//! notifications as ordered event deliveries.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use taggr_core::{
    AttRequest, AttResult, PeerHandle, Radio, RadioEvent, RadioState, Role, RoleState, Store,
    TagSession, keys,
};
use taggr_proto::{CharacteristicDef, SessionAttributes};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemStore(HashMap<String, String>);

impl Store for MemStore {
    fn get(&self, key: &str) -> taggr_core::Result<Option<String>> {
        Ok(self.0.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> taggr_core::Result<()> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Cmd {
    Connect(PeerHandle),
    CancelConnection(PeerHandle),
    DiscoverServices { peer: PeerHandle, services: Vec<Uuid> },
    DiscoverCharacteristics { peer: PeerHandle, characteristics: Vec<Uuid> },
    Write { peer: PeerHandle, characteristic: Uuid, value: Vec<u8> },
    Subscribe { peer: PeerHandle, characteristic: Uuid },
    RespondWrite { request: AttRequest, result: AttResult },
    Notify { characteristic: Uuid, value: Vec<u8> },
}

#[derive(Debug, Default)]
struct RadioInner {
    outbox: VecDeque<Cmd>,
    advertising: Option<(Uuid, Vec<Uuid>)>,
    scanning: Option<Uuid>,
}

/// One device's radio: shared with the bus, which drains the outbox and
/// feeds events back through the owning session.
#[derive(Debug, Clone, Default)]
struct BusRadio(Rc<RefCell<RadioInner>>);

impl Radio for BusRadio {
    fn start_advertising(&mut self, service: Uuid, characteristics: &[CharacteristicDef]) {
        let mut inner = self.0.borrow_mut();
        assert!(inner.scanning.is_none(), "advertise and scan intents overlap");
        inner.advertising = Some((service, characteristics.iter().map(|c| c.uuid).collect()));
    }

    fn stop_advertising(&mut self) {
        self.0.borrow_mut().advertising = None;
    }

    fn start_scanning(&mut self, service: Uuid, _allow_duplicates: bool) {
        let mut inner = self.0.borrow_mut();
        assert!(inner.advertising.is_none(), "advertise and scan intents overlap");
        inner.scanning = Some(service);
    }

    fn stop_scanning(&mut self) {
        self.0.borrow_mut().scanning = None;
    }

    fn connect(&mut self, peer: PeerHandle) {
        self.0.borrow_mut().outbox.push_back(Cmd::Connect(peer));
    }

    fn cancel_connection(&mut self, peer: PeerHandle) {
        self.0.borrow_mut().outbox.push_back(Cmd::CancelConnection(peer));
    }

    fn discover_services(&mut self, peer: PeerHandle, services: &[Uuid]) {
        self.0
            .borrow_mut()
            .outbox
            .push_back(Cmd::DiscoverServices { peer, services: services.to_vec() });
    }

    fn discover_characteristics(&mut self, peer: PeerHandle, _service: Uuid, characteristics: &[Uuid]) {
        self.0.borrow_mut().outbox.push_back(Cmd::DiscoverCharacteristics {
            peer,
            characteristics: characteristics.to_vec(),
        });
    }

    fn write_characteristic(&mut self, peer: PeerHandle, characteristic: Uuid, value: &[u8], _ack: bool) {
        self.0.borrow_mut().outbox.push_back(Cmd::Write {
            peer,
            characteristic,
            value: value.to_vec(),
        });
    }

    fn read_characteristic(&mut self, _peer: PeerHandle, _characteristic: Uuid) {}

    fn subscribe_notifications(&mut self, peer: PeerHandle, characteristic: Uuid) {
        self.0.borrow_mut().outbox.push_back(Cmd::Subscribe { peer, characteristic });
    }

    fn respond_to_write(&mut self, request: AttRequest, result: AttResult) {
        self.0.borrow_mut().outbox.push_back(Cmd::RespondWrite { request, result });
    }

    fn respond_to_read(&mut self, _request: AttRequest, _value: Option<Vec<u8>>) {}

    fn notify_subscribers(&mut self, characteristic: Uuid, value: &[u8]) {
        self.0
            .borrow_mut()
            .outbox
            .push_back(Cmd::Notify { characteristic, value: value.to_vec() });
    }
}

type Session = TagSession<BusRadio, MemStore>;

struct Bus {
    radios: Vec<BusRadio>,
    queue: VecDeque<(usize, RadioEvent)>,
    /// request id -> (writer, target, characteristic)
    pending_writes: HashMap<u64, (usize, usize, Uuid)>,
    subscriptions: HashMap<(usize, Uuid), HashSet<usize>>,
    /// (scanner, advertiser, service) triples already reported
    discovered: HashSet<(usize, usize, Uuid)>,
    /// devices whose next incoming connect attempt fails
    fail_connect_once: HashSet<usize>,
    next_request: u64,
    rssi: i16,
}

impl Bus {
    fn new(radios: Vec<BusRadio>) -> Self {
        Self {
            radios,
            queue: VecDeque::new(),
            pending_writes: HashMap::new(),
            subscriptions: HashMap::new(),
            discovered: HashSet::new(),
            fail_connect_once: HashSet::new(),
            next_request: 0,
            rssi: -45,
        }
    }

    fn scan_matches(&mut self) {
        for scanner in 0..self.radios.len() {
            let Some(wanted) = self.radios[scanner].0.borrow().scanning else { continue };
            for advertiser in 0..self.radios.len() {
                if advertiser == scanner {
                    continue;
                }
                let advertises = self.radios[advertiser]
                    .0
                    .borrow()
                    .advertising
                    .as_ref()
                    .is_some_and(|(service, _)| *service == wanted);
                if advertises && self.discovered.insert((scanner, advertiser, wanted)) {
                    self.queue.push_back((
                        scanner,
                        RadioEvent::Discovered { peer: PeerHandle(advertiser as u64), rssi: self.rssi },
                    ));
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        for issuer in 0..self.radios.len() {
            loop {
                let cmd = self.radios[issuer].0.borrow_mut().outbox.pop_front();
                let Some(cmd) = cmd else { break };
                self.translate(issuer, cmd);
            }
        }
    }

    fn translate(&mut self, issuer: usize, cmd: Cmd) {
        match cmd {
            Cmd::Connect(peer) => {
                let target = peer.0 as usize;
                if self.fail_connect_once.remove(&target) {
                    self.discovered.retain(|(s, a, _)| !(*s == issuer && *a == target));
                    self.queue.push_back((issuer, RadioEvent::ConnectFailed { peer }));
                } else {
                    self.queue.push_back((issuer, RadioEvent::Connected { peer }));
                }
            }
            Cmd::CancelConnection(peer) => {
                self.queue.push_back((issuer, RadioEvent::Disconnected { peer }));
            }
            Cmd::DiscoverServices { peer, services } => {
                let target = peer.0 as usize;
                let offered: Vec<Uuid> = self.radios[target]
                    .0
                    .borrow()
                    .advertising
                    .as_ref()
                    .map(|(service, _)| vec![*service])
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|s| services.contains(s))
                    .collect();
                self.queue.push_back((issuer, RadioEvent::ServicesDiscovered { peer, services: offered }));
            }
            Cmd::DiscoverCharacteristics { peer, characteristics } => {
                let target = peer.0 as usize;
                let inner = self.radios[target].0.borrow();
                let (service, offered) = match inner.advertising.as_ref() {
                    Some((service, chars)) => (
                        *service,
                        chars.iter().copied().filter(|c| characteristics.contains(c)).collect(),
                    ),
                    None => return,
                };
                drop(inner);
                self.queue.push_back((
                    issuer,
                    RadioEvent::CharacteristicsDiscovered { peer, service, characteristics: offered },
                ));
            }
            Cmd::Write { peer, characteristic, value } => {
                let target = peer.0 as usize;
                let request = AttRequest(self.next_request);
                self.pending_writes.insert(self.next_request, (issuer, target, characteristic));
                self.next_request += 1;
                self.queue.push_back((target, RadioEvent::IncomingWrite { request, characteristic, value }));
            }
            Cmd::Subscribe { peer, characteristic } => {
                let target = peer.0 as usize;
                self.subscriptions.entry((target, characteristic)).or_default().insert(issuer);
                self.queue.push_back((target, RadioEvent::SubscriberAttached { characteristic }));
            }
            Cmd::RespondWrite { request, result } => {
                let Some((writer, target, characteristic)) = self.pending_writes.remove(&request.0)
                else {
                    return;
                };
                self.queue.push_back((
                    writer,
                    RadioEvent::WriteCompleted {
                        peer: PeerHandle(target as u64),
                        characteristic,
                        success: result == AttResult::Success,
                    },
                ));
            }
            Cmd::Notify { characteristic, value } => {
                let subscribers = self
                    .subscriptions
                    .get(&(issuer, characteristic))
                    .cloned()
                    .unwrap_or_default();
                for subscriber in subscribers {
                    self.queue.push_back((
                        subscriber,
                        RadioEvent::ValueUpdated {
                            peer: PeerHandle(issuer as u64),
                            characteristic,
                            value: value.clone(),
                        },
                    ));
                }
            }
        }
    }

    /// True while a characteristic write is between issue and ack: the
    /// handshake's commit window.
    fn write_in_flight(&self) -> bool {
        !self.pending_writes.is_empty()
            || self.queue.iter().any(|(_, e)| {
                matches!(
                    e,
                    RadioEvent::WriteCompleted { .. } | RadioEvent::IncomingWrite { .. }
                )
            })
    }

    /// Deliver events until `stop` returns true. Panics when the budget runs
    /// out (the game itself never terminates, so every test needs a goal).
    fn run_until(
        &mut self,
        sessions: &mut [Session],
        mut stop: impl FnMut(&[Session], bool) -> bool,
    ) {
        for _ in 0..10_000 {
            self.scan_matches();
            self.drain_commands();
            let Some((target, event)) = self.queue.pop_front() else {
                if stop(sessions, self.write_in_flight()) {
                    return;
                }
                panic!("bus quiescent before reaching the goal");
            };
            sessions[target].handle_event(event);
            self.drain_commands();
            if stop(sessions, self.write_in_flight()) {
                return;
            }
        }
        panic!("no convergence within the step budget");
    }
}

fn make_device() -> (Session, BusRadio) {
    let radio = BusRadio::default();
    let mut session = TagSession::new(radio.clone(), MemStore::default()).unwrap();
    session.handle_event(RadioEvent::StateChanged(RadioState::PoweredOn));
    (session, radio)
}

fn make_device_in_game(role: Role, attributes: SessionAttributes) -> (Session, BusRadio) {
    let mut store = MemStore::default();
    let state = RoleState { role, target_peer: None, attributes };
    store.set(keys::ROLE_STATE, &serde_json::to_string(&state).unwrap()).unwrap();
    let radio = BusRadio::default();
    let mut session = TagSession::new(radio.clone(), store).unwrap();
    session.handle_event(RadioEvent::StateChanged(RadioState::PoweredOn));
    session.reattach(None).unwrap();
    (session, radio)
}

fn marked_count(sessions: &[Session]) -> usize {
    sessions.iter().filter(|s| s.role() == Some(Role::Marked)).count()
}

fn all_in_game(sessions: &[Session]) -> bool {
    sessions.iter().all(|s| s.role().is_some())
}

#[test]
fn two_devices_bootstrap_and_converge() {
    let (mut initiator, r0) = make_device();
    let (mut joiner, r1) = make_device();
    initiator.create_group().unwrap();
    joiner.join_group().unwrap();

    let mut sessions = [initiator, joiner];
    let mut bus = Bus::new(vec![r0, r1]);
    bus.run_until(&mut sessions, |s, _| all_in_game(s));

    assert_eq!(marked_count(&sessions), 1);
    // the attribute pair written over the two bootstrap characteristics
    // reconstructs identically on the joiner
    assert_eq!(sessions[0].session_attributes(), sessions[1].session_attributes());
    assert!(sessions[0].session_attributes().is_some());
}

#[test]
fn three_devices_elect_exactly_one_starter() {
    let (mut initiator, r0) = make_device();
    let (mut a, r1) = make_device();
    let (mut b, r2) = make_device();
    initiator.create_group().unwrap();
    a.join_group().unwrap();
    b.join_group().unwrap();

    let mut sessions = [initiator, a, b];
    let mut bus = Bus::new(vec![r0, r1, r2]);
    bus.run_until(&mut sessions, |s, _| all_in_game(s));

    assert_eq!(marked_count(&sessions), 1);
    let attrs = sessions[0].session_attributes().unwrap();
    assert!(sessions.iter().all(|s| s.session_attributes() == Some(attrs)));
}

#[test]
fn tag_handshake_swaps_roles() {
    let attributes = SessionAttributes::generate();
    let (marked, r0) = make_device_in_game(Role::Marked, attributes);
    let (seeker, r1) = make_device_in_game(Role::Seeker, attributes);

    let mut sessions = [marked, seeker];
    let mut bus = Bus::new(vec![r0, r1]);
    bus.run_until(&mut sessions, |s, write_in_flight| {
        // liveness invariant: outside the handshake's commit window there is
        // never a moment with zero marked devices
        assert!(marked_count(s) >= 1 || write_in_flight, "zero marked devices");
        s[0].role() == Some(Role::Seeker) && s[1].role() == Some(Role::Marked)
    });
}

#[test]
fn seeker_retries_after_failed_connect() {
    let attributes = SessionAttributes::generate();
    let (marked, r0) = make_device_in_game(Role::Marked, attributes);
    let (seeker, r1) = make_device_in_game(Role::Seeker, attributes);

    let mut sessions = [marked, seeker];
    let mut bus = Bus::new(vec![r0, r1]);
    // first attempt against the marked device is refused by the radio
    bus.fail_connect_once.insert(0);
    bus.run_until(&mut sessions, |s, _| {
        s[0].role() == Some(Role::Seeker) && s[1].role() == Some(Role::Marked)
    });
}

#[test]
fn stale_discovery_after_game_start_is_ignored() {
    let attributes = SessionAttributes::generate();
    let (mut marked, _r0) = make_device_in_game(Role::Marked, attributes);

    // a discovery queued before the role changed arrives late
    marked.handle_event(RadioEvent::Discovered { peer: PeerHandle(3), rssi: -20 });

    assert_eq!(marked.role(), Some(Role::Marked));
    assert!(marked.radio().0.borrow().advertising.is_some());
    assert!(marked.radio().0.borrow().scanning.is_none());
}
