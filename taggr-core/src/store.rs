//! Host-persisted key/value boundary and the stable device identity.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Keys the core persists under. Hosts must treat these as opaque.
pub mod keys {
    /// The installation's stable 128-bit identity, as a UUID string.
    pub const DEVICE_IDENTITY: &str = "device-identity";
    /// The current game's role + session attributes, as JSON.
    pub const ROLE_STATE: &str = "role-state";
}

/// Minimal persistent string store provided by the host. An empty string
/// stored under a key counts as absent.
pub trait Store {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Fetch a key, folding empty values into `None`.
pub(crate) fn get_nonempty<S: Store>(store: &S, key: &str) -> Result<Option<String>> {
    Ok(store.get(key)?.filter(|v| !v.is_empty()))
}

/// Opaque, stable identifier generated once per installation.
///
/// Immutable after first creation; the seeker announces it to a marked
/// device during the tag handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(Uuid);

impl DeviceIdentity {
    /// Load the persisted identity, generating and persisting a fresh one on
    /// first use.
    pub fn load_or_create<S: Store>(store: &mut S) -> Result<Self> {
        match get_nonempty(store, keys::DEVICE_IDENTITY)? {
            Some(raw) => {
                let id = Uuid::parse_str(raw.trim())
                    .map_err(|_| Error::CorruptState(format!("bad device identity {raw:?}")))?;
                Ok(Self(id))
            }
            None => {
                let id = Uuid::new_v4();
                store.set(keys::DEVICE_IDENTITY, &id.to_string())?;
                Ok(Self(id))
            }
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
