//! Binary message table format.
//!
//! One table per account partition, stored under `messages.<account_id>`.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (64 bytes, fixed)             │
//! │  magic: [u8; 8] = b"TMPBOX\0\0"      │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  message_count: u64                  │
//! │  sha256_payload: [u8; 32]            │
//! │  (padding to 64 bytes)               │
//! ├──────────────────────────────────────┤
//! │ PAYLOAD (variable)                   │
//! │  bincode-serialized Vec<Message>     │
//! └──────────────────────────────────────┘
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Result, TempboxError};
use crate::model::message::Message;

/// Magic bytes identifying a tempbox message table.
pub const MAGIC: &[u8; 8] = b"TMPBOX\0\0";

/// Current table format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Serializable table header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TableHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved flags (currently unused).
    pub flags: u32,
    /// Number of messages in the payload.
    pub message_count: u64,
    /// SHA-256 of the payload bytes.
    pub sha256_payload: [u8; 32],
}

impl TableHeader {
    /// Validate that the header is well-formed and matches the current format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}

/// Encode a partition's messages into header + payload bytes.
pub fn encode_table(messages: &[Message]) -> Result<Vec<u8>> {
    let payload = bincode::serialize(messages)?;
    let header = TableHeader {
        magic: *MAGIC,
        version: VERSION,
        flags: 0,
        message_count: messages.len() as u64,
        sha256_payload: Sha256::digest(&payload).into(),
    };
    let header_bytes = bincode::serialize(&header)?;

    let mut out = vec![0u8; HEADER_SIZE];
    let copy_len = header_bytes.len().min(HEADER_SIZE);
    out[..copy_len].copy_from_slice(&header_bytes[..copy_len]);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode and verify a table written by [`encode_table`].
///
/// `key` is only used for error context.
pub fn decode_table(key: &str, data: &[u8]) -> Result<Vec<Message>> {
    let corrupt = |reason: String| TempboxError::CorruptTable {
        key: key.to_string(),
        reason,
    };

    if data.len() < HEADER_SIZE {
        return Err(corrupt(format!("table too small ({} bytes)", data.len())));
    }

    let header: TableHeader = bincode::deserialize(&data[..HEADER_SIZE])
        .map_err(|e| corrupt(format!("Header deserialization failed: {e}")))?;
    header.validate().map_err(corrupt)?;

    let payload = &data[HEADER_SIZE..];
    let digest: [u8; 32] = Sha256::digest(payload).into();
    if digest != header.sha256_payload {
        return Err(corrupt("payload checksum mismatch".into()));
    }

    let messages: Vec<Message> = bincode::deserialize(payload)
        .map_err(|e| corrupt(format!("Entry deserialization failed: {e}")))?;
    if messages.len() as u64 != header.message_count {
        return Err(corrupt("message count mismatch".into()));
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<Message> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        vec![Message::new_unread(
            "20240301T120000000Za@x.com".into(),
            "default",
            "a@x.com",
            Some("Hello"),
            None,
            at,
        )]
    }

    #[test]
    fn test_header_fits_fixed_size() {
        let header = TableHeader {
            magic: *MAGIC,
            version: VERSION,
            flags: 0,
            message_count: u64::MAX,
            sha256_payload: [0xff; 32],
        };
        assert!(bincode::serialize(&header).unwrap().len() <= HEADER_SIZE);
    }

    #[test]
    fn test_decode_rejects_tampered_payload() {
        let mut bytes = encode_table(&sample()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = decode_table("messages.default", &bytes).unwrap_err();
        assert!(matches!(err, TempboxError::CorruptTable { .. }));
    }

    #[test]
    fn test_decode_rejects_wrong_magic() {
        let mut bytes = encode_table(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(decode_table("messages.default", &bytes).is_err());
    }

    #[test]
    fn test_decode_preserves_messages() {
        let messages = sample();
        let bytes = encode_table(&messages).unwrap();
        assert_eq!(decode_table("messages.default", &bytes).unwrap(), messages);
    }
}
