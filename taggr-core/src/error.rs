//! Error taxonomy.
//!
//! Transient radio failures (failed connect, failed write, disconnect) are
//! not errors: the protocols recover by falling back to the role's default
//! posture. Protocol violations and stale callbacks are logged and dropped.
//! Only local, non-protocol failures surface through this enum.

use crate::radio::RadioState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing key/value store failed to read or write.
    #[error("store failure: {0}")]
    Store(String),

    /// A characteristic value failed to decode.
    #[error(transparent)]
    Wire(#[from] taggr_proto::WireError),

    /// The radio capability is missing or not authorized on this host.
    #[error("radio unavailable: {0:?}")]
    RadioUnavailable(RadioState),

    /// Reattachment was requested but nothing was persisted.
    #[error("no persisted session to restore")]
    NothingToRestore,

    /// The requested operation does not fit the current phase, e.g. starting
    /// a bootstrap while a game is running.
    #[error("operation invalid in the current phase")]
    InvalidPhase,

    /// Persisted state exists but cannot be parsed.
    #[error("persisted state is corrupt: {0}")]
    CorruptState(String),
}
