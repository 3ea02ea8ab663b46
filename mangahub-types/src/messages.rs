//! Typed payloads for every operation on both transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session-side filter token admitting progress events.
pub const EVENT_PROGRESS: &str = "progress";
/// Session-side filter token admitting library events.
pub const EVENT_LIBRARY: &str = "library";

/// Datagram filter token admitting every event type.
pub const DG_EVENT_ALL: &str = "all";
/// Datagram filter token for progress mutations.
pub const DG_EVENT_PROGRESS_UPDATE: &str = "progress_update";
/// Datagram filter token for library mutations.
pub const DG_EVENT_LIBRARY_UPDATE: &str = "library_update";

/// Reading status of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStatus {
    /// Currently being read.
    Reading,
    /// Finished.
    Completed,
    /// Shelved for later.
    PlanToRead,
}

impl ReadingStatus {
    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Reading => "reading",
            ReadingStatus::Completed => "completed",
            ReadingStatus::PlanToRead => "plan_to_read",
        }
    }
}

impl fmt::Display for ReadingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reading" => Ok(ReadingStatus::Reading),
            "completed" => Ok(ReadingStatus::Completed),
            "plan_to_read" => Ok(ReadingStatus::PlanToRead),
            _ => Err(()),
        }
    }
}

/// Direction of an `update_event` relative to the receiving session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A sibling device performed the mutation.
    Incoming,
    /// This session performed the mutation.
    Outgoing,
}

// --- duplex inbound payloads ---

/// `auth` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    /// Bearer token issued by the account service.
    pub token: String,
}

/// `connect` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Device class, e.g. `desktop`, `mobile`.
    #[serde(default)]
    pub device_type: String,
    /// Human-readable device name.
    #[serde(default)]
    pub device_name: String,
}

/// `heartbeat` payload. Everything is optional; a bare `{}` is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Client-chosen identifier, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// When the client sent the beat; used for an RTT estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// `subscribe_updates` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribeUpdatesPayload {
    /// Requested filter; empty defaults to `{progress, library}`.
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// `sync_progress` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncProgressPayload {
    /// Target manga.
    pub manga_id: String,
    /// New chapter position, must be >= 0.
    pub current_chapter: i64,
    /// Optional new reading status; validated against [`ReadingStatus`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `add_to_library` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddToLibraryPayload {
    /// Target manga.
    pub manga_id: String,
    /// Initial status; defaults to `plan_to_read`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// `remove_from_library` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveFromLibraryPayload {
    /// Target manga.
    pub manga_id: String,
}

/// `get_progress` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProgressPayload {
    /// Target manga.
    pub manga_id: String,
}

/// `disconnect` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectPayload {
    /// Optional human-readable reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// --- duplex outbound payloads ---

/// `connect_response` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponsePayload {
    /// The allocated session id.
    pub session_id: String,
    /// Echo of the device type.
    pub device_type: String,
    /// RFC 3339 instant the session was created.
    pub connected_at: String,
}

/// The most recent progress sync recorded on a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSyncInfo {
    /// Manga the sync targeted.
    pub manga_id: String,
    /// Title captured at commit time.
    pub manga_title: String,
    /// Chapter position.
    pub chapter: i64,
    /// RFC 3339 instant of the sync.
    pub timestamp: String,
}

/// `status` payload returned for `status_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponsePayload {
    /// Always `active` while the session exists.
    pub connection_status: String,
    /// Local side of the server socket.
    pub server_address: String,
    /// Seconds since `connected_at`.
    pub uptime_seconds: i64,
    /// RFC 3339 instant of the last heartbeat, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<String>,
    /// The session id.
    pub session_id: String,
    /// Live sessions for this user across all devices.
    pub devices_online: i64,
    /// Outbound frames written for this session.
    pub messages_sent: i64,
    /// Inbound frames parsed for this session.
    pub messages_received: i64,
    /// Most recent progress sync, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<LastSyncInfo>,
    /// Classified network quality label.
    pub network_quality: String,
    /// Most recent RTT sample in milliseconds.
    pub rtt_ms: i64,
}

/// One row of the `library` reply: `user_progress` joined with `manga`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryItem {
    /// Manga id.
    pub manga_id: String,
    /// Manga title.
    pub title: String,
    /// Author, when the catalog knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Comma-separated genres.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<String>,
    /// Publication status of the manga itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_status: Option<String>,
    /// Total chapter count, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chapters: Option<i64>,
    /// Catalog description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Cover image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// The user's chapter position.
    pub current_chapter: i64,
    /// The user's reading status.
    pub read_status: String,
    /// RFC 3339 instant of the last mutation.
    pub updated_at: String,
}

/// `progress` payload returned for `get_progress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// The user's chapter position.
    pub current_chapter: i64,
    /// The user's reading status.
    pub status: String,
    /// RFC 3339 instant of the last mutation.
    pub updated_at: String,
}

/// The condensed monitor event sent to subscribed duplex sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEventPayload {
    /// RFC 3339 instant the event was published.
    pub timestamp: String,
    /// Whether the receiving session originated the mutation.
    pub direction: Direction,
    /// `updated`, `added` or `removed`.
    pub action: String,
    /// Title of the affected manga.
    pub manga_title: String,
    /// Chapter position (0 for library events).
    pub chapter: i64,
    /// Device type of the receiving session. Not attributive: this is the
    /// target's device type, not the originator's.
    pub device_type: String,
}

// --- datagram payloads ---

/// `register` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPayload {
    /// Bearer token issued by the account service.
    pub token: String,
}

/// `subscribe` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscribePayload {
    /// Requested filter; each element must be `all`, `progress_update` or
    /// `library_update`.
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Body of a `notification` datagram.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationData {
    /// Affected manga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manga_id: Option<String>,
    /// Chapter position on progress events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<i64>,
    /// Reading status on progress events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// `added` or `removed` on library events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// RFC 3339 instant of the commit on progress events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_status_wire_names() {
        assert_eq!(ReadingStatus::Reading.as_str(), "reading");
        assert_eq!(ReadingStatus::PlanToRead.as_str(), "plan_to_read");
        assert_eq!(
            serde_json::to_string(&ReadingStatus::PlanToRead).unwrap(),
            "\"plan_to_read\""
        );
    }

    #[test]
    fn reading_status_from_str() {
        assert_eq!("reading".parse(), Ok(ReadingStatus::Reading));
        assert_eq!("completed".parse(), Ok(ReadingStatus::Completed));
        assert_eq!("plan_to_read".parse(), Ok(ReadingStatus::PlanToRead));
        assert!("dropped".parse::<ReadingStatus>().is_err());
        assert!("".parse::<ReadingStatus>().is_err());
    }

    #[test]
    fn direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Incoming).unwrap(), "\"incoming\"");
        assert_eq!(serde_json::to_string(&Direction::Outgoing).unwrap(), "\"outgoing\"");
    }

    #[test]
    fn sync_progress_payload_defaults_status() {
        let p: SyncProgressPayload =
            serde_json::from_str(r#"{"manga_id":"m1","current_chapter":3}"#).unwrap();
        assert_eq!(p.manga_id, "m1");
        assert_eq!(p.current_chapter, 3);
        assert!(p.status.is_none());
    }

    #[test]
    fn subscribe_payload_accepts_missing_event_types() {
        let p: SubscribeUpdatesPayload = serde_json::from_str("{}").unwrap();
        assert!(p.event_types.is_empty());
    }

    #[test]
    fn status_response_roundtrip() {
        let status = StatusResponsePayload {
            connection_status: "active".to_string(),
            server_address: "127.0.0.1:9090".to_string(),
            uptime_seconds: 12,
            last_heartbeat: Some("2025-01-01T00:00:00Z".to_string()),
            session_id: "sess_alice_pc_desktop_01012025T000000_ab12".to_string(),
            devices_online: 2,
            messages_sent: 5,
            messages_received: 7,
            last_sync: Some(LastSyncInfo {
                manga_id: "m1".to_string(),
                manga_title: "Berserk".to_string(),
                chapter: 42,
                timestamp: "2025-01-01T00:00:00Z".to_string(),
            }),
            network_quality: "excellent".to_string(),
            rtt_ms: 12,
        };

        let json = serde_json::to_string(&status).unwrap();
        let restored: StatusResponsePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.session_id, status.session_id);
        assert_eq!(restored.last_sync, status.last_sync);
    }
}
