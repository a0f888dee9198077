//! Opaque event cursors.
//!
//! A cursor encodes an event's `(occurred_at, id)` position as a URL-safe
//! Base64 token. Consumers treat it as opaque: encode/decode round-trip only,
//! never construct one manually. Seeking strictly after the encoded position
//! makes repeated pagination dupe-free and gap-free even while publishers
//! append concurrently.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, StaffError};
use crate::events::StaffXEvent;

/// An opaque cursor into the event log's total order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventCursor {
    /// Version for forward compatibility.
    #[serde(default = "default_cursor_version")]
    pub version: u8,
    /// Timestamp component of the position.
    pub occurred_at: DateTime<Utc>,
    /// Id tiebreak within the timestamp.
    pub id: i64,
}

fn default_cursor_version() -> u8 {
    1
}

impl EventCursor {
    pub fn new(occurred_at: DateTime<Utc>, id: i64) -> Self {
        Self {
            version: 1,
            occurred_at,
            id,
        }
    }

    /// Cursor pointing at an event; queries seeded with it resume strictly
    /// after that event.
    pub fn from_event(event: &StaffXEvent) -> Self {
        Self::new(event.occurred_at, event.id)
    }

    /// Encode the cursor to an opaque string token.
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_string(self).map_err(|e| {
            StaffError::with_internal(
                ErrorCode::SerializationError,
                "Failed to encode cursor",
                e.to_string(),
            )
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json.as_bytes()))
    }

    /// Decode a cursor from an opaque string token.
    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|e| {
            StaffError::with_internal(
                ErrorCode::InvalidCursor,
                "Invalid cursor format",
                e.to_string(),
            )
        })?;

        let json = String::from_utf8(bytes).map_err(|e| {
            StaffError::with_internal(
                ErrorCode::InvalidCursor,
                "Invalid cursor encoding",
                e.to_string(),
            )
        })?;

        serde_json::from_str(&json).map_err(|e| {
            StaffError::with_internal(
                ErrorCode::InvalidCursor,
                "Failed to decode cursor",
                e.to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_encode_decode() {
        let cursor = EventCursor::new(Utc::now(), 42);
        let encoded = cursor.encode().unwrap();
        let decoded = EventCursor::decode(&encoded).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn test_cursor_token_is_opaque() {
        let cursor = EventCursor::new(Utc::now(), 7);
        let token = cursor.encode().unwrap();
        // URL-safe alphabet, no padding.
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = EventCursor::decode("!!! not a cursor !!!").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCursor);

        // Valid base64, invalid payload.
        let token = URL_SAFE_NO_PAD.encode(b"{\"nope\": true}");
        let err = EventCursor::decode(&token).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidCursor);
    }
}
