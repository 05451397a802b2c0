//! Launch decision: resume a persisted game or start fresh.
//!
//! The host process manager calls [`launch`] once per process with whatever
//! radio session identifier the OS preserved across suspension. A device
//! mid-game takes its old role's posture straight away; a fresh install
//! waits for the player to create or join a group.

use taggr_core::{Error, Radio, Result, Role, SessionHandle, SessionObserver, TagSession};
use tracing::{info, warn};

use crate::FileStore;

/// How the session came up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launched {
    /// A persisted game was found; its role posture resumes once the radio
    /// reports powered on.
    Resumed(Role),
    /// Nothing persisted; the caller decides between creating and joining a
    /// group.
    Fresh,
}

/// Build this process's session, reattaching to a persisted game when one
/// exists.
pub fn launch<R: Radio>(
    radio: R,
    store: FileStore,
    observer: Box<dyn SessionObserver>,
    prior: Option<SessionHandle>,
) -> Result<(TagSession<R, FileStore>, Launched)> {
    let mut session = TagSession::with_observer(radio, store, observer)?;
    match session.reattach(prior) {
        Ok(role) => {
            info!(?role, "resumed persisted game");
            Ok((session, Launched::Resumed(role)))
        }
        Err(Error::NothingToRestore) => {
            info!("no persisted game, starting fresh");
            Ok((session, Launched::Fresh))
        }
        Err(Error::CorruptState(msg)) => {
            // a broken state file must not brick the install
            warn!(%msg, "persisted game unreadable, starting fresh");
            Ok((session, Launched::Fresh))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use taggr_core::{
        AttRequest, AttResult, NullObserver, PeerHandle, RoleState, Store, keys,
    };
    use taggr_proto::{CharacteristicDef, SessionAttributes};
    use uuid::Uuid;

    struct NoopRadio;

    impl Radio for NoopRadio {
        fn start_advertising(&mut self, _service: Uuid, _characteristics: &[CharacteristicDef]) {}
        fn stop_advertising(&mut self) {}
        fn start_scanning(&mut self, _service: Uuid, _allow_duplicates: bool) {}
        fn stop_scanning(&mut self) {}
        fn connect(&mut self, _peer: PeerHandle) {}
        fn cancel_connection(&mut self, _peer: PeerHandle) {}
        fn discover_services(&mut self, _peer: PeerHandle, _services: &[Uuid]) {}
        fn discover_characteristics(&mut self, _peer: PeerHandle, _service: Uuid, _chars: &[Uuid]) {}
        fn write_characteristic(&mut self, _peer: PeerHandle, _char: Uuid, _value: &[u8], _ack: bool) {}
        fn read_characteristic(&mut self, _peer: PeerHandle, _characteristic: Uuid) {}
        fn subscribe_notifications(&mut self, _peer: PeerHandle, _characteristic: Uuid) {}
        fn respond_to_write(&mut self, _request: AttRequest, _result: AttResult) {}
        fn respond_to_read(&mut self, _request: AttRequest, _value: Option<Vec<u8>>) {}
        fn notify_subscribers(&mut self, _characteristic: Uuid, _value: &[u8]) {}
    }

    fn temp_store(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("taggr-launch-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn fresh_install_launches_fresh() {
        let path = temp_store("fresh");
        let _ = fs::remove_file(&path);
        let store = FileStore::open(path.clone()).unwrap();

        let (_, launched) = launch(NoopRadio, store, Box::new(NullObserver), None).unwrap();
        assert_eq!(launched, Launched::Fresh);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn persisted_game_is_resumed() {
        let path = temp_store("resume");
        let _ = fs::remove_file(&path);
        let mut store = FileStore::open(path.clone()).unwrap();
        let state = RoleState {
            role: Role::Marked,
            target_peer: None,
            attributes: SessionAttributes::generate(),
        };
        store.set(keys::ROLE_STATE, &serde_json::to_string(&state).unwrap()).unwrap();

        let (session, launched) = launch(
            NoopRadio,
            store,
            Box::new(NullObserver),
            Some(SessionHandle("os-preserved".into())),
        )
        .unwrap();
        assert_eq!(launched, Launched::Resumed(Role::Marked));
        assert_eq!(session.role(), Some(Role::Marked));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_state_degrades_to_fresh() {
        let path = temp_store("corrupt");
        let _ = fs::remove_file(&path);
        let mut store = FileStore::open(path.clone()).unwrap();
        store.set(keys::ROLE_STATE, "{ not json").unwrap();

        let (_, launched) = launch(NoopRadio, store, Box::new(NullObserver), None).unwrap();
        assert_eq!(launched, Launched::Fresh);

        let _ = fs::remove_file(&path);
    }
}
