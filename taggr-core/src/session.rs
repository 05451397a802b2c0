//! Session driver.
//!
//! One [`TagSession`] per device owns the radio, the host store, and the
//! active phase (bootstrap or game). Every radio event enters here, gets
//! routed to the active protocol, and the results are persisted and surfaced
//! through the [`SessionObserver`]. The session is the composition root's
//! state object: no globals, one serial execution context.

use taggr_proto::SessionAttributes;
use tracing::{debug, info, warn};

use crate::bootstrap::{BootstrapProgress, GroupBootstrap, GroupSnapshot};
use crate::error::{Error, Result};
use crate::radio::{Radio, RadioEvent, RadioState};
use crate::store::{self, DeviceIdentity, Store, keys};
use crate::tag::{Role, RoleState, TagMachine};

/// Identifier of a radio session the host OS preserved across process
/// suspension, handed back by the process manager on relaunch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle(pub String);

/// Application-facing event surface. The UI collaborator implements this;
/// every method has a no-op default so hosts subscribe only to what they
/// render.
pub trait SessionObserver {
    fn role_changed(&mut self, _role: Role) {}
    fn peer_joined(&mut self, _connected: usize) {}
    fn peer_ready(&mut self, _ready: usize, _connected: usize) {}
    fn game_started(&mut self, _role: Role) {}
    fn radio_unavailable(&mut self, _state: RadioState) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NullObserver;

impl SessionObserver for NullObserver {}

#[derive(Debug)]
enum Phase {
    Idle,
    Bootstrap(GroupBootstrap),
    Game(TagMachine),
}

enum Outcome {
    Bootstrap(BootstrapProgress),
    Game(Role),
}

/// The per-device protocol session.
pub struct TagSession<R: Radio, S: Store> {
    radio: R,
    store: S,
    identity: DeviceIdentity,
    phase: Phase,
    radio_state: RadioState,
    observer: Box<dyn SessionObserver>,
}

impl<R: Radio, S: Store> TagSession<R, S> {
    pub fn new(radio: R, store: S) -> Result<Self> {
        Self::with_observer(radio, store, Box::new(NullObserver))
    }

    pub fn with_observer(radio: R, mut store: S, observer: Box<dyn SessionObserver>) -> Result<Self> {
        let identity = DeviceIdentity::load_or_create(&mut store)?;
        Ok(Self {
            radio,
            store,
            identity,
            phase: Phase::Idle,
            radio_state: RadioState::Unknown,
            observer,
        })
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// Current game role, if a game is running.
    pub fn role(&self) -> Option<Role> {
        match &self.phase {
            Phase::Game(machine) => Some(machine.role()),
            _ => None,
        }
    }

    pub fn session_attributes(&self) -> Option<SessionAttributes> {
        match &self.phase {
            Phase::Game(machine) => Some(machine.attributes()),
            _ => None,
        }
    }

    pub fn group_snapshot(&self) -> Option<&GroupSnapshot> {
        match &self.phase {
            Phase::Bootstrap(bootstrap) => Some(bootstrap.snapshot()),
            _ => None,
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Start a new group as its initiator. Generates fresh session
    /// attributes and begins scanning for joiners.
    pub fn create_group(&mut self) -> Result<()> {
        self.begin_bootstrap(GroupBootstrap::initiator())
    }

    /// Join a forming group: advertise the bootstrap service and wait for
    /// the initiator.
    pub fn join_group(&mut self) -> Result<()> {
        self.begin_bootstrap(GroupBootstrap::joiner())
    }

    fn begin_bootstrap(&mut self, mut bootstrap: GroupBootstrap) -> Result<()> {
        self.ensure_radio()?;
        if !matches!(self.phase, Phase::Idle) {
            return Err(Error::InvalidPhase);
        }
        if self.radio_state.is_usable() {
            bootstrap.assume_posture(&mut self.radio);
        }
        self.phase = Phase::Bootstrap(bootstrap);
        Ok(())
    }

    /// Resume a persisted game after process restart: restore the stored
    /// role state and take its posture directly, without re-running
    /// bootstrap or re-deriving anything from the radio.
    pub fn reattach(&mut self, prior: Option<SessionHandle>) -> Result<Role> {
        self.ensure_radio()?;
        let raw = store::get_nonempty(&self.store, keys::ROLE_STATE)?
            .ok_or(Error::NothingToRestore)?;
        let state: RoleState =
            serde_json::from_str(&raw).map_err(|err| Error::CorruptState(err.to_string()))?;
        if let Some(handle) = &prior {
            debug!(handle = %handle.0, "reattaching to preserved radio session");
        }
        let mut machine = TagMachine::new(self.identity, state.attributes, state.role);
        if self.radio_state.is_usable() {
            machine.enter(&mut self.radio);
        }
        let role = machine.role();
        self.phase = Phase::Game(machine);
        info!(?role, "session reattached");
        Ok(role)
    }

    /// Tear the session down: drop both postures, cancel live connections,
    /// forget peers and the persisted game.
    pub fn dissolve(&mut self) -> Result<()> {
        match &mut self.phase {
            Phase::Idle => {}
            Phase::Bootstrap(bootstrap) => bootstrap.halt(&mut self.radio),
            Phase::Game(machine) => machine.halt(&mut self.radio),
        }
        self.phase = Phase::Idle;
        self.store.set(keys::ROLE_STATE, "")?;
        info!("session dissolved");
        Ok(())
    }

    /// Entry point for every radio callback, in arrival order.
    pub fn handle_event(&mut self, event: RadioEvent) {
        if let RadioEvent::StateChanged(state) = event {
            self.on_radio_state(state);
            return;
        }
        let outcome = match &mut self.phase {
            Phase::Idle => {
                debug!("radio event while idle dropped");
                None
            }
            Phase::Bootstrap(bootstrap) => {
                bootstrap.handle_event(&mut self.radio, &event).map(Outcome::Bootstrap)
            }
            Phase::Game(machine) => {
                machine.handle_event(&mut self.radio, &event).map(Outcome::Game)
            }
        };
        match outcome {
            None => {}
            Some(Outcome::Bootstrap(progress)) => self.on_bootstrap_progress(progress),
            Some(Outcome::Game(role)) => {
                self.persist_role_state();
                self.observer.role_changed(role);
            }
        }
    }

    fn on_bootstrap_progress(&mut self, progress: BootstrapProgress) {
        match progress {
            BootstrapProgress::PeerJoined { connected } => self.observer.peer_joined(connected),
            BootstrapProgress::PeerReady { ready, connected } => {
                self.observer.peer_ready(ready, connected)
            }
            BootstrapProgress::Complete { attributes, role } => {
                let mut machine = TagMachine::new(self.identity, attributes, role);
                if self.radio_state.is_usable() {
                    machine.enter(&mut self.radio);
                }
                self.phase = Phase::Game(machine);
                self.persist_role_state();
                self.observer.game_started(role);
            }
        }
    }

    fn on_radio_state(&mut self, state: RadioState) {
        let previous = self.radio_state;
        self.radio_state = state;
        if state.is_usable() {
            if previous == state {
                return;
            }
            info!("radio powered on, taking posture");
            match &mut self.phase {
                Phase::Idle => {}
                Phase::Bootstrap(bootstrap) => bootstrap.assume_posture(&mut self.radio),
                Phase::Game(machine) => machine.enter(&mut self.radio),
            }
            return;
        }
        warn!(?state, "radio unavailable, halting postures");
        match &mut self.phase {
            Phase::Idle => {}
            Phase::Bootstrap(bootstrap) => bootstrap.halt(&mut self.radio),
            Phase::Game(machine) => machine.halt(&mut self.radio),
        }
        self.observer.radio_unavailable(state);
    }

    fn persist_role_state(&mut self) {
        let Phase::Game(machine) = &self.phase else { return };
        match serde_json::to_string(machine.state()) {
            Ok(json) => {
                if let Err(err) = self.store.set(keys::ROLE_STATE, &json) {
                    warn!(%err, "failed to persist role state");
                }
            }
            Err(err) => warn!(%err, "failed to serialize role state"),
        }
    }

    fn ensure_radio(&self) -> Result<()> {
        if self.radio_state.is_terminal() {
            return Err(Error::RadioUnavailable(self.radio_state));
        }
        Ok(())
    }
}
