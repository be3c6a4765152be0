//! Wire framing for game messages
//!
//! Layout (all lengths are prefixes of the field that follows):
//!
//! ```text
//! [1 byte]  type length      (clamped to 255)
//! [n bytes] type             (UTF-8)
//! [1 byte]  room id length   (clamped to 255)
//! [n bytes] room id
//! [1 byte]  sender length    (clamped to 255)
//! [n bytes] sender device name
//! [2 bytes] payload length   (little-endian, 0..=65535)
//! [n bytes] payload
//! ```
//!
//! String fields longer than 255 bytes are truncated, not rejected. Decoding
//! therefore returns the truncated prefix, never the original string.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::FrameError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Maximum encoded length of a string field
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Maximum encoded payload length
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ----------------------------------------------------------------------------
// Game Message
// ----------------------------------------------------------------------------

/// An application message exchanged inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMessage {
    /// Message type string (e.g. "emote", "bingo.number")
    pub message_type: String,
    /// Room the message belongs to
    pub room_id: String,
    /// Device name of the sender
    pub sender: String,
    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl GameMessage {
    pub fn new(
        message_type: impl Into<String>,
        room_id: impl Into<String>,
        sender: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            payload,
        }
    }

    /// Encode to the wire format
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                max: MAX_PAYLOAD_LEN,
                actual: self.payload.len(),
            });
        }

        let mut bytes = Vec::with_capacity(
            3 + self.message_type.len() + self.room_id.len() + self.sender.len() + 2
                + self.payload.len(),
        );
        put_str(&mut bytes, "type", &self.message_type);
        put_str(&mut bytes, "room_id", &self.room_id);
        put_str(&mut bytes, "sender", &self.sender);
        bytes.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        Ok(bytes)
    }

    /// Decode from the wire format
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameReader::new(bytes);

        let message_type = reader.read_str("type")?;
        let room_id = reader.read_str("room_id")?;
        let sender = reader.read_str("sender")?;
        let payload_len = u16::from_le_bytes(reader.take_array::<2>("payload_len")?) as usize;
        let payload = reader.take("payload", payload_len)?.to_vec();

        let remaining = reader.remaining();
        if remaining != 0 {
            return Err(FrameError::TrailingBytes { count: remaining });
        }

        Ok(Self {
            message_type,
            room_id,
            sender,
            payload,
        })
    }
}

// ----------------------------------------------------------------------------
// Encoding Helpers
// ----------------------------------------------------------------------------

/// Longest prefix of `s` that fits a length byte and ends on a char boundary
pub fn truncate_field(s: &str) -> &str {
    if s.len() <= MAX_FIELD_LEN {
        return s;
    }
    let mut end = MAX_FIELD_LEN;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn put_str(bytes: &mut Vec<u8>, field: &'static str, value: &str) {
    let truncated = truncate_field(value);
    if truncated.len() < value.len() {
        debug!(
            field,
            original_len = value.len(),
            encoded_len = truncated.len(),
            "Truncating oversized frame field"
        );
    }
    bytes.push(truncated.len() as u8);
    bytes.extend_from_slice(truncated.as_bytes());
}

// ----------------------------------------------------------------------------
// Decoding Helpers
// ----------------------------------------------------------------------------

struct FrameReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < len {
            return Err(FrameError::Truncated {
                field,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], FrameError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(field, N)?);
        Ok(array)
    }

    fn read_str(&mut self, field: &'static str) -> Result<String, FrameError> {
        let [len] = self.take_array::<1>(field)?;
        let raw = self.take(field, len as usize)?;
        core::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| FrameError::InvalidUtf8 { field })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GameMessage {
        GameMessage::new("emote", "room-7", "Alice's iPhone", b"\x01\x02\x03".to_vec())
    }

    #[test]
    fn test_exact_byte_layout() {
        let encoded = GameMessage::new("ab", "r", "", vec![0xAA; 258])
            .encode()
            .unwrap();

        assert_eq!(&encoded[..6], &[2, b'a', b'b', 1, b'r', 0]);
        // 258 = 0x0102, little-endian
        assert_eq!(&encoded[6..8], &[0x02, 0x01]);
        assert_eq!(encoded.len(), 8 + 258);
    }

    #[test]
    fn test_roundtrip_preserves_short_fields() {
        let message = sample();
        let decoded = GameMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_long_sender_is_truncated_to_255_bytes() {
        let sender = "s".repeat(300);
        let message = GameMessage::new("emote", "room", sender.clone(), Vec::new());

        let decoded = GameMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.sender.len(), 255);
        assert_eq!(decoded.sender, sender[..255]);
        assert_ne!(decoded.sender, sender);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // 254 ASCII bytes followed by a 2-byte character straddling the limit
        let value = format!("{}é", "x".repeat(254));
        assert_eq!(value.len(), 256);
        assert_eq!(truncate_field(&value).len(), 254);

        let message = GameMessage::new(value, "room", "sender", Vec::new());
        let decoded = GameMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded.message_type, "x".repeat(254));
    }

    #[test]
    fn test_payload_limits() {
        let max = GameMessage::new("t", "r", "s", vec![7; MAX_PAYLOAD_LEN]);
        let decoded = GameMessage::decode(&max.encode().unwrap()).unwrap();
        assert_eq!(decoded.payload.len(), MAX_PAYLOAD_LEN);

        let too_big = GameMessage::new("t", "r", "s", vec![7; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(
            too_big.encode(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_frames() {
        assert!(matches!(
            GameMessage::decode(&[]),
            Err(FrameError::Truncated { field: "type", .. })
        ));

        let encoded = sample().encode().unwrap();
        assert!(GameMessage::decode(&encoded[..encoded.len() - 1]).is_err());

        let mut trailing = encoded.clone();
        trailing.push(0);
        assert_eq!(
            GameMessage::decode(&trailing),
            Err(FrameError::TrailingBytes { count: 1 })
        );

        let invalid_utf8 = [1u8, 0xFF, 0, 0, 0, 0];
        assert_eq!(
            GameMessage::decode(&invalid_utf8),
            Err(FrameError::InvalidUtf8 { field: "type" })
        );
    }
}
