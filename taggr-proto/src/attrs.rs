//! BLE GATT attribute identifiers for group bootstrap and tag sessions.
//!
//! The bootstrap identifiers are build-time constants, identical across all
//! installations, so that two fresh installs can find each other before they
//! share anything else. The session identifiers are dynamic: regenerated by
//! the group initiator for every new session and disseminated over the
//! bootstrap characteristics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bootstrap service UUID: 7a661000-9c4d-48e2-0000-000000000000
///
/// Advertised by joiners while a group is forming. Never carries game data.
pub const BOOTSTRAP_SERVICE_UUID: Uuid = Uuid::from_u128(0x7a661000_9c4d_48e2_0000_000000000000);

/// Session service id characteristic (write+read)
///
/// The initiator writes the session *service* UUID here, as its canonical
/// string.
pub const TAG_SERVICE_ID_UUID: Uuid = Uuid::from_u128(0x7a661001_9c4d_48e2_0000_000000000000);

/// Session characteristic id characteristic (write+read)
///
/// The initiator writes the session *characteristic* UUID here.
pub const TAG_CHARACTERISTIC_ID_UUID: Uuid =
    Uuid::from_u128(0x7a661002_9c4d_48e2_0000_000000000000);

/// Ready flag characteristic (read+subscribe+write)
///
/// A joiner publishes 0x01 once both session identifiers have been received.
pub const READY_UUID: Uuid = Uuid::from_u128(0x7a661003_9c4d_48e2_0000_000000000000);

/// Chosen-starter characteristic (write+subscribe)
///
/// The initiator writes 0x01 to exactly one joiner (start marked) and 0x00 to
/// every other.
pub const CHOSEN_STARTER_UUID: Uuid = Uuid::from_u128(0x7a661004_9c4d_48e2_0000_000000000000);

/// Permissions on a characteristic, as a peripheral must publish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// A characteristic identifier paired with its permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub props: CharacteristicProps,
}

/// The four bootstrap characteristics, in the order a peripheral publishes
/// them under [`BOOTSTRAP_SERVICE_UUID`].
pub const fn bootstrap_characteristics() -> [CharacteristicDef; 4] {
    [
        CharacteristicDef {
            uuid: TAG_SERVICE_ID_UUID,
            props: CharacteristicProps { read: true, write: true, notify: false },
        },
        CharacteristicDef {
            uuid: TAG_CHARACTERISTIC_ID_UUID,
            props: CharacteristicProps { read: true, write: true, notify: false },
        },
        CharacteristicDef {
            uuid: READY_UUID,
            props: CharacteristicProps { read: true, write: true, notify: true },
        },
        CharacteristicDef {
            uuid: CHOSEN_STARTER_UUID,
            props: CharacteristicProps { read: false, write: true, notify: true },
        },
    ]
}

/// The identifier pair of one play session's tag-signalling channel.
///
/// Shared by every device in a session; owned by the role state machine once
/// bootstrap completes and immutable from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttributes {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl SessionAttributes {
    /// Generate a fresh pair. Called by the initiator once per new group.
    pub fn generate() -> Self {
        Self { service: Uuid::new_v4(), characteristic: Uuid::new_v4() }
    }
}
