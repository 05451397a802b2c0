//! Taggr attribute schema and wire format
//!
//! This crate defines the GATT service and characteristic identifiers used by
//! the group-bootstrap and tag protocols, together with the byte-level
//! encoding of every value that crosses a characteristic. It is pure
//! configuration data plus encode/decode helpers; all behavior lives in
//! `taggr-core`.

pub mod attrs;
pub mod wire;

pub use attrs::{
    BOOTSTRAP_SERVICE_UUID, CHOSEN_STARTER_UUID, READY_UUID, TAG_CHARACTERISTIC_ID_UUID,
    TAG_SERVICE_ID_UUID, CharacteristicDef, CharacteristicProps, SessionAttributes,
    bootstrap_characteristics,
};
pub use wire::{FLAG_CLEAR, FLAG_SET, WireError, decode_flag, decode_uuid, encode_flag, encode_uuid};
