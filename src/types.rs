//! Core identifiers and store records.
//!
//! Rooms and participants are identified by validated string newtypes.
//! Room ids are normalized the way the room-access layer normalizes
//! human-entered names; participant ids are room-scoped display names,
//! not globally unique. Both end up as store path segments, so neither
//! may contain `/`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::echo::WriteFingerprint;

/// Maximum length of a room or participant id, in bytes.
const MAX_ID_LEN: usize = 64;

/// Errors from id validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Room name empty, or empty after normalization.
    InvalidRoomName,
    /// Participant name empty, too long, or containing a path separator.
    InvalidParticipant,
}

impl std::fmt::Display for IdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRoomName => write!(f, "Invalid room name"),
            Self::InvalidParticipant => write!(f, "Invalid participant name"),
        }
    }
}

impl std::error::Error for IdError {}

/// A validated, normalized room identifier.
///
/// Normalization: trim, lowercase, runs of whitespace become `-`, any
/// character outside `[a-z0-9-_]` is dropped, and the result is capped
/// at 64 bytes. An empty result is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(String);

impl RoomId {
    /// Normalize and validate a human-entered room name.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let mut out = String::with_capacity(raw.len());
        let mut pending_dash = false;
        for c in raw.trim().chars() {
            if c.is_whitespace() {
                pending_dash = !out.is_empty();
                continue;
            }
            for lc in c.to_lowercase() {
                if lc.is_ascii_lowercase() || lc.is_ascii_digit() || lc == '-' || lc == '_' {
                    if pending_dash {
                        out.push('-');
                        pending_dash = false;
                    }
                    out.push(lc);
                }
            }
            if out.len() >= MAX_ID_LEN {
                break;
            }
        }
        out.truncate(MAX_ID_LEN);
        if out.is_empty() {
            return Err(IdError::InvalidRoomName);
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A room-scoped participant identifier (display name).
///
/// Kept mostly as entered — display names may contain spaces — but it
/// becomes a store path segment, so `/` is rejected, as are empty and
/// over-long names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_ID_LEN || trimmed.contains('/') {
            return Err(IdError::InvalidParticipant);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The canonical document value stored at `rooms/{room}/content`.
///
/// Content is opaque editor markup; the sync core never inspects its
/// structure. The fingerprint identifies the write for echo filtering,
/// and the revision is an advisory wall-clock hint, never used for
/// conflict resolution (the store's write-arrival order is the only
/// serialization).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writer: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<WriteFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl DocumentRecord {
    /// The lazily-initialized empty document.
    pub fn empty() -> Self {
        Self {
            content: String::new(),
            writer: None,
            fingerprint: None,
            revision: None,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Presence record at `rooms/{room}/users/{participant}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub joined_at: u64,
}

impl PresenceRecord {
    pub fn now() -> Self {
        Self { joined_at: now_ms() }
    }
}

/// Milliseconds since the Unix epoch. Advisory only.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_normalization() {
        let room = RoomId::parse("  My Shared Room  ").unwrap();
        assert_eq!(room.as_str(), "my-shared-room");

        let room = RoomId::parse("shareroom").unwrap();
        assert_eq!(room.as_str(), "shareroom");

        let room = RoomId::parse("Team_42!@#").unwrap();
        assert_eq!(room.as_str(), "team_42");
    }

    #[test]
    fn test_room_id_caps_length() {
        let long = "r".repeat(200);
        let room = RoomId::parse(&long).unwrap();
        assert_eq!(room.as_str().len(), 64);
    }

    #[test]
    fn test_room_id_rejects_empty() {
        assert_eq!(RoomId::parse(""), Err(IdError::InvalidRoomName));
        assert_eq!(RoomId::parse("   "), Err(IdError::InvalidRoomName));
        assert_eq!(RoomId::parse("!!!"), Err(IdError::InvalidRoomName));
    }

    #[test]
    fn test_participant_id_keeps_display_name() {
        let p = ParticipantId::parse("  Alice Smith ").unwrap();
        assert_eq!(p.as_str(), "Alice Smith");
    }

    #[test]
    fn test_participant_id_rejects_path_separator() {
        assert_eq!(
            ParticipantId::parse("a/b"),
            Err(IdError::InvalidParticipant)
        );
        assert_eq!(ParticipantId::parse(""), Err(IdError::InvalidParticipant));
        assert_eq!(
            ParticipantId::parse(&"x".repeat(100)),
            Err(IdError::InvalidParticipant)
        );
    }

    #[test]
    fn test_document_record_json_roundtrip() {
        let writer = ParticipantId::parse("Alice").unwrap();
        let record = DocumentRecord {
            content: "<p>hello</p>".to_string(),
            writer: Some(writer.clone()),
            fingerprint: Some(WriteFingerprint {
                participant: writer,
                seq: 7,
            }),
            revision: Some(1234),
        };
        let value = record.to_value().unwrap();
        let parsed = DocumentRecord::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_document_record_tolerates_missing_metadata() {
        // A record written by a minimal client carries only content.
        let value = serde_json::json!({ "content": "plain" });
        let parsed = DocumentRecord::from_value(value).unwrap();
        assert_eq!(parsed.content, "plain");
        assert!(parsed.fingerprint.is_none());
        assert!(parsed.writer.is_none());
    }
}
