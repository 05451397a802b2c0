//! Test doubles shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use taggr_proto::CharacteristicDef;
use uuid::Uuid;

use crate::error::Result;
use crate::radio::{AttRequest, AttResult, PeerHandle, Radio, RadioState};
use crate::session::SessionObserver;
use crate::store::Store;
use crate::tag::Role;

/// Everything a radio was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartAdvertising { service: Uuid },
    StopAdvertising,
    StartScanning { service: Uuid, allow_duplicates: bool },
    StopScanning,
    Connect(PeerHandle),
    CancelConnection(PeerHandle),
    DiscoverServices { peer: PeerHandle, services: Vec<Uuid> },
    DiscoverCharacteristics { peer: PeerHandle, service: Uuid, characteristics: Vec<Uuid> },
    Write { peer: PeerHandle, characteristic: Uuid, value: Vec<u8>, ack_required: bool },
    Read { peer: PeerHandle, characteristic: Uuid },
    Subscribe { peer: PeerHandle, characteristic: Uuid },
    Notify { characteristic: Uuid, value: Vec<u8> },
}

/// Records commands and tracks posture intent. Panics when both postures
/// would be active at once, so every test doubles as an exclusivity check.
#[derive(Debug, Default)]
pub struct RecordingRadio {
    pub commands: Vec<Command>,
    pub advertising: Option<Uuid>,
    pub scanning: Option<Uuid>,
    pub connects: Vec<PeerHandle>,
    pub write_responses: Vec<(AttRequest, AttResult)>,
    pub read_responses: Vec<(AttRequest, Option<Vec<u8>>)>,
    pub notifications: Vec<(Uuid, Vec<u8>)>,
}

impl Radio for RecordingRadio {
    fn start_advertising(&mut self, service: Uuid, _characteristics: &[CharacteristicDef]) {
        assert!(self.scanning.is_none(), "advertising while scan intent is active");
        self.advertising = Some(service);
        self.commands.push(Command::StartAdvertising { service });
    }

    fn stop_advertising(&mut self) {
        self.advertising = None;
        self.commands.push(Command::StopAdvertising);
    }

    fn start_scanning(&mut self, service: Uuid, allow_duplicates: bool) {
        assert!(self.advertising.is_none(), "scanning while advertise intent is active");
        self.scanning = Some(service);
        self.commands.push(Command::StartScanning { service, allow_duplicates });
    }

    fn stop_scanning(&mut self) {
        self.scanning = None;
        self.commands.push(Command::StopScanning);
    }

    fn connect(&mut self, peer: PeerHandle) {
        self.connects.push(peer);
        self.commands.push(Command::Connect(peer));
    }

    fn cancel_connection(&mut self, peer: PeerHandle) {
        self.commands.push(Command::CancelConnection(peer));
    }

    fn discover_services(&mut self, peer: PeerHandle, services: &[Uuid]) {
        self.commands.push(Command::DiscoverServices { peer, services: services.to_vec() });
    }

    fn discover_characteristics(&mut self, peer: PeerHandle, service: Uuid, characteristics: &[Uuid]) {
        self.commands.push(Command::DiscoverCharacteristics {
            peer,
            service,
            characteristics: characteristics.to_vec(),
        });
    }

    fn write_characteristic(
        &mut self,
        peer: PeerHandle,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) {
        self.commands.push(Command::Write {
            peer,
            characteristic,
            value: value.to_vec(),
            ack_required,
        });
    }

    fn read_characteristic(&mut self, peer: PeerHandle, characteristic: Uuid) {
        self.commands.push(Command::Read { peer, characteristic });
    }

    fn subscribe_notifications(&mut self, peer: PeerHandle, characteristic: Uuid) {
        self.commands.push(Command::Subscribe { peer, characteristic });
    }

    fn respond_to_write(&mut self, request: AttRequest, result: AttResult) {
        self.write_responses.push((request, result));
    }

    fn respond_to_read(&mut self, request: AttRequest, value: Option<Vec<u8>>) {
        self.read_responses.push((request, value));
    }

    fn notify_subscribers(&mut self, characteristic: Uuid, value: &[u8]) {
        self.notifications.push((characteristic, value.to_vec()));
        self.commands.push(Command::Notify { characteristic, value: value.to_vec() });
    }
}

/// String store backed by a map.
#[derive(Debug, Default)]
pub struct MemStore {
    map: HashMap<String, String>,
}

impl Store for MemStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Observer that appends one line per callback to a shared log.
pub struct RecordingObserver {
    log: Rc<RefCell<Vec<String>>>,
}

impl RecordingObserver {
    pub fn new() -> (Self, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Self { log: Rc::clone(&log) }, log)
    }
}

impl SessionObserver for RecordingObserver {
    fn role_changed(&mut self, role: Role) {
        self.log.borrow_mut().push(format!("role:{role:?}"));
    }

    fn peer_joined(&mut self, connected: usize) {
        self.log.borrow_mut().push(format!("joined:{connected}"));
    }

    fn peer_ready(&mut self, ready: usize, connected: usize) {
        self.log.borrow_mut().push(format!("ready:{ready}/{connected}"));
    }

    fn game_started(&mut self, role: Role) {
        self.log.borrow_mut().push(format!("game:{role:?}"));
    }

    fn radio_unavailable(&mut self, state: RadioState) {
        self.log.borrow_mut().push(format!("radio-unavailable:{state:?}"));
    }
}
