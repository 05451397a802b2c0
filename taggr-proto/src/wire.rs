//! Byte-level encoding of characteristic values.
//!
//! A 128-bit identifier travels as its canonical hyphenated UUID string in
//! UTF-8. The ready and chosen-starter flags (and the marked-status value)
//! travel as single bytes.

use uuid::Uuid;

/// Flag byte meaning "unset" / "not the starter" / "not ready".
pub const FLAG_CLEAR: u8 = 0x00;

/// Flag byte meaning "set" / "starter" / "ready".
pub const FLAG_SET: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("value is not valid UTF-8")]
    NotUtf8,
    #[error("value is not a UUID string: {0:?}")]
    BadUuid(String),
    #[error("empty value where a flag byte was expected")]
    EmptyFlag,
}

/// Encode an identifier as its canonical UUID string.
pub fn encode_uuid(id: Uuid) -> Vec<u8> {
    id.to_string().into_bytes()
}

/// Decode an identifier from its canonical UUID string form.
pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid, WireError> {
    let s = std::str::from_utf8(bytes).map_err(|_| WireError::NotUtf8)?;
    Uuid::parse_str(s).map_err(|_| WireError::BadUuid(s.to_string()))
}

/// Encode a flag as its single-byte form.
pub fn encode_flag(set: bool) -> [u8; 1] {
    if set { [FLAG_SET] } else { [FLAG_CLEAR] }
}

/// Decode a flag byte. Any non-zero first byte counts as set.
pub fn decode_flag(bytes: &[u8]) -> Result<bool, WireError> {
    match bytes.first() {
        Some(&b) => Ok(b != FLAG_CLEAR),
        None => Err(WireError::EmptyFlag),
    }
}
