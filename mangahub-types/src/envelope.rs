//! Envelope - the wire format wrapper for all sync messages.
//!
//! Duplex frames are a single JSON object terminated by a newline; datagram
//! frames are one JSON object per packet. Both carry a `type` discriminator
//! and an optional operation-specific body. Extra fields are tolerated on
//! parse and UTF-8 is preserved throughout.

use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame was not valid JSON.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame parsed but carried no `type` discriminator.
    #[error("message type is required")]
    MissingType,
}

/// A duplex (session channel) frame.
///
/// `{"type":"<op>","payload":{...}}`, newline-terminated on the wire.
/// Some clients send the body under `data` instead of `payload`; both are
/// accepted on parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Operation discriminator. Never empty after a successful parse.
    #[serde(rename = "type")]
    pub kind: String,
    /// Operation-specific body.
    #[serde(default, alias = "data", skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Parse a single frame (without the trailing newline).
    pub fn parse(data: &str) -> Result<Self, FrameError> {
        let env: Envelope = serde_json::from_str(data)?;
        if env.kind.is_empty() {
            return Err(FrameError::MissingType);
        }
        Ok(env)
    }

    /// Build an envelope around a serializable body.
    pub fn data<T: Serialize>(kind: &str, body: &T) -> Result<Self, FrameError> {
        Ok(Self {
            kind: kind.to_string(),
            payload: Some(serde_json::to_value(body)?),
        })
    }

    /// A bare envelope with an empty `{}` body.
    pub fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            payload: Some(Value::Object(serde_json::Map::new())),
        }
    }

    /// `{"type":"success","payload":{"message":...}}`
    pub fn success(message: &str) -> Self {
        Self {
            kind: "success".to_string(),
            payload: Some(serde_json::json!({ "message": message })),
        }
    }

    /// `{"type":"pong","payload":{}}`
    pub fn pong() -> Self {
        Self::bare("pong")
    }

    /// `{"type":"heartbeat","payload":{"timestamp":...}}` - the echo the
    /// server writes back for every inbound heartbeat.
    pub fn heartbeat_echo() -> Self {
        Self {
            kind: "heartbeat".to_string(),
            payload: Some(serde_json::json!({
                "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            })),
        }
    }

    /// Decode the body into a typed payload. A missing body decodes as `{}`
    /// so operations without required fields accept bare envelopes.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let value = self
            .payload
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to a newline-terminated wire line.
    pub fn to_line(&self) -> Result<String, FrameError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A connectionless (notification channel) frame.
///
/// `{"type":"<op>","data":{...},"timestamp":"..."}`, one object per packet.
/// `event_type` and `user_id` only appear on outbound `notification` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datagram {
    /// Operation discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Mutation event type on `notification` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Target user on `notification` frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Operation-specific body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// RFC 3339 instant, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

fn now_rfc3339() -> Option<String> {
    Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

impl Datagram {
    /// Parse a single packet.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let msg: Datagram = serde_json::from_slice(data)?;
        if msg.kind.is_empty() {
            return Err(FrameError::MissingType);
        }
        Ok(msg)
    }

    /// Build a datagram around a serializable body.
    pub fn data_message<T: Serialize>(kind: &str, body: &T) -> Result<Self, FrameError> {
        Ok(Self {
            kind: kind.to_string(),
            event_type: None,
            user_id: None,
            data: Some(serde_json::to_value(body)?),
            timestamp: now_rfc3339(),
        })
    }

    /// `{"type":"success","data":{"message":...}}`
    pub fn success(message: &str) -> Self {
        Self {
            kind: "success".to_string(),
            event_type: None,
            user_id: None,
            data: Some(serde_json::json!({ "message": message })),
            timestamp: now_rfc3339(),
        }
    }

    /// `{"type":"error","data":{"code":...,"message":...}}`
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            kind: "error".to_string(),
            event_type: None,
            user_id: None,
            data: Some(serde_json::json!({ "code": code, "message": message })),
            timestamp: now_rfc3339(),
        }
    }

    /// The fan-out notification written to registered endpoints.
    pub fn notification<T: Serialize>(
        user_id: &str,
        event_type: &str,
        body: &T,
    ) -> Result<Self, FrameError> {
        Ok(Self {
            kind: "notification".to_string(),
            event_type: Some(event_type.to_string()),
            user_id: Some(user_id.to_string()),
            data: Some(serde_json::to_value(body)?),
            timestamp: now_rfc3339(),
        })
    }

    /// Decode the body into a typed payload (missing body decodes as `{}`).
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        let value = self
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to packet bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope {
            kind: "sync_progress".to_string(),
            payload: Some(serde_json::json!({
                "manga_id": "m1",
                "current_chapter": 42,
            })),
        };

        let line = env.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let restored = Envelope::parse(line.trim_end()).unwrap();
        assert_eq!(env, restored);
    }

    #[test]
    fn envelope_missing_type_rejected() {
        assert!(matches!(
            Envelope::parse(r#"{"payload":{}}"#),
            Err(FrameError::Json(_))
        ));
        assert!(matches!(
            Envelope::parse(r#"{"type":"","payload":{}}"#),
            Err(FrameError::MissingType)
        ));
    }

    #[test]
    fn envelope_invalid_json_rejected() {
        assert!(matches!(
            Envelope::parse("{not valid json}"),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn envelope_tolerates_extra_fields() {
        let env = Envelope::parse(r#"{"type":"ping","payload":{},"extra":1}"#).unwrap();
        assert_eq!(env.kind, "ping");
    }

    #[test]
    fn envelope_accepts_data_alias() {
        let env = Envelope::parse(r#"{"type":"auth","data":{"token":"t"}}"#).unwrap();
        assert_eq!(env.payload.unwrap()["token"], "t");
    }

    #[test]
    fn envelope_preserves_utf8() {
        let env = Envelope {
            kind: "success".to_string(),
            payload: Some(serde_json::json!({ "message": "葬送のフリーレン" })),
        };
        let restored = Envelope::parse(env.to_line().unwrap().trim_end()).unwrap();
        assert_eq!(restored.payload.unwrap()["message"], "葬送のフリーレン");
    }

    #[test]
    fn missing_payload_decodes_as_empty_object() {
        #[derive(serde::Deserialize)]
        struct Empty {
            #[serde(default)]
            reason: Option<String>,
        }

        let env = Envelope::parse(r#"{"type":"disconnect"}"#).unwrap();
        let body: Empty = env.payload_as().unwrap();
        assert!(body.reason.is_none());
    }

    #[test]
    fn datagram_roundtrip() {
        let msg = Datagram {
            kind: "subscribe".to_string(),
            event_type: None,
            user_id: None,
            data: Some(serde_json::json!({ "event_types": ["all"] })),
            timestamp: Some("2025-01-01T00:00:00Z".to_string()),
        };

        let bytes = msg.to_bytes().unwrap();
        let restored = Datagram::parse(&bytes).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn datagram_notification_carries_event_type() {
        let msg = Datagram::notification(
            "u1",
            "library_update",
            &serde_json::json!({ "manga_id": "m1", "action": "added" }),
        )
        .unwrap();

        assert_eq!(msg.kind, "notification");
        assert_eq!(msg.event_type.as_deref(), Some("library_update"));
        assert_eq!(msg.user_id.as_deref(), Some("u1"));
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn datagram_missing_type_rejected() {
        assert!(Datagram::parse(br#"{"data":{}}"#).is_err());
        assert!(matches!(
            Datagram::parse(br#"{"type":""}"#),
            Err(FrameError::MissingType)
        ));
    }
}
