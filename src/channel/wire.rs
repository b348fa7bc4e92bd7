//! Binary wire protocol between store clients and the store server.
//!
//! Frames are bincode-encoded request/reply enums over WebSocket binary
//! messages. JSON values travel as raw `serde_json` bytes inside the
//! frame so the store never has to understand them. Request ids are
//! assigned by the client and unique per connection; a subscription is
//! addressed by the id of the `Subscribe` request that created it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreRequest {
    Read { id: u64, path: String },
    Write { id: u64, path: String, value: Vec<u8> },
    Remove { id: u64, path: String },
    Subscribe { id: u64, path: String },
    Unsubscribe { id: u64, sub: u64 },
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreReply {
    /// Read result. `None` means the path is absent.
    Value { id: u64, value: Option<Vec<u8>> },
    /// Write/remove/subscribe/unsubscribe acknowledged.
    Ack { id: u64 },
    /// Request failed.
    Error { id: u64, message: String },
    /// Subscription notification: the full value at the subscribed
    /// path, or `None` when it was removed.
    Event { sub: u64, value: Option<Vec<u8>> },
}

/// Wire codec errors.
#[derive(Debug, Clone)]
pub enum WireError {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "Encode error: {e}"),
            Self::Decode(e) => write!(f, "Decode error: {e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl StoreRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (req, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| WireError::Decode(e.to_string()))?;
        Ok(req)
    }
}

impl StoreReply {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| WireError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let (reply, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| WireError::Decode(e.to_string()))?;
        Ok(reply)
    }
}

/// Encode a JSON value for a frame payload.
pub fn value_to_bytes(value: &Value) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(value).map_err(|e| WireError::Encode(e.to_string()))
}

/// Decode a JSON value from a frame payload.
pub fn bytes_to_value(bytes: &[u8]) -> Result<Value, WireError> {
    serde_json::from_slice(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let value = value_to_bytes(&json!({ "content": "hello" })).unwrap();
        let req = StoreRequest::Write {
            id: 42,
            path: "rooms/a/content".to_string(),
            value,
        };
        let encoded = req.encode().unwrap();
        let decoded = StoreRequest::decode(&encoded).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_reply_roundtrip() {
        let replies = vec![
            StoreReply::Value {
                id: 1,
                value: Some(value_to_bytes(&json!("x")).unwrap()),
            },
            StoreReply::Value { id: 2, value: None },
            StoreReply::Ack { id: 3 },
            StoreReply::Error {
                id: 4,
                message: "bad frame".to_string(),
            },
            StoreReply::Event { sub: 5, value: None },
        ];
        for reply in replies {
            let encoded = reply.encode().unwrap();
            assert_eq!(StoreReply::decode(&encoded).unwrap(), reply);
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(StoreRequest::decode(&[0xFF, 0xFE, 0xFD]).is_err());
        assert!(StoreReply::decode(&[0xFF]).is_err());
        assert!(bytes_to_value(b"not json").is_err());
    }

    #[test]
    fn test_value_bytes_roundtrip() {
        let value = json!({ "users": { "Alice": { "joined_at": 1 } } });
        let bytes = value_to_bytes(&value).unwrap();
        assert_eq!(bytes_to_value(&bytes).unwrap(), value);
    }
}
