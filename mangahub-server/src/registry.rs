//! Session registry: device <-> session <-> user bookkeeping.
//!
//! Three keyed maps kept symmetric under one lock: `session_id -> Session`,
//! `client_id -> session_id`, `user_id -> [session_id]`. All operations are
//! point-in-time consistent and O(1) or O(sessions-per-user).

use crate::bridge::{SessionLookup, SessionView};
use chrono::{DateTime, Utc};
use mangahub_types::messages::{EVENT_LIBRARY, EVENT_PROGRESS};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// The most recent progress sync recorded on a session.
#[derive(Debug, Clone, PartialEq)]
pub struct LastSync {
    /// Manga the sync targeted.
    pub manga_id: String,
    /// Title captured at commit time.
    pub manga_title: String,
    /// Chapter position.
    pub chapter: i64,
    /// When the sync committed.
    pub time: DateTime<Utc>,
}

/// An authenticated device's live relationship with the session server.
#[derive(Debug, Clone)]
pub struct Session {
    /// Stable human-readable token, see [`generate_session_id`].
    pub session_id: String,
    /// Owning user.
    pub user_id: String,
    /// Device class, e.g. `desktop`.
    pub device_type: String,
    /// Human-readable device name.
    pub device_name: String,
    /// When the session was created.
    pub connected_at: DateTime<Utc>,
    /// When the device last heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Outbound frames written for this session.
    pub messages_sent: i64,
    /// Inbound frames parsed for this session.
    pub messages_received: i64,
    /// Most recent progress sync, if any.
    pub last_sync: Option<LastSync>,
    /// Whether the session receives `update_event` fan-out.
    pub subscribed: bool,
    /// Event-type filter; meaningful only while `subscribed`.
    pub event_types: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    client_to_session: HashMap<String, String>,
    user_to_sessions: HashMap<String, Vec<String>>,
}

/// Thread-safe owner of all [`Session`] records.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh session for an authenticated device and index it in
    /// all three maps. A previous session on the same client is replaced.
    pub fn create(
        &self,
        client_id: &str,
        user_id: &str,
        device_type: &str,
        device_name: &str,
    ) -> Session {
        let mut inner = self.write();
        if let Some(old_id) = inner.client_to_session.get(client_id).cloned() {
            remove_session(&mut inner, &old_id);
        }

        let now = Utc::now();
        let session = Session {
            session_id: generate_session_id(device_name, device_type),
            user_id: user_id.to_string(),
            device_type: device_type.to_string(),
            device_name: device_name.to_string(),
            connected_at: now,
            last_heartbeat: now,
            messages_sent: 0,
            messages_received: 0,
            last_sync: None,
            subscribed: false,
            event_types: Vec::new(),
        };

        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        inner
            .client_to_session
            .insert(client_id.to_string(), session.session_id.clone());
        inner
            .user_to_sessions
            .entry(user_id.to_string())
            .or_default()
            .push(session.session_id.clone());

        session
    }

    /// Look up the session bound to a connection.
    pub fn lookup_by_client(&self, client_id: &str) -> Option<Session> {
        let inner = self.read();
        let session_id = inner.client_to_session.get(client_id)?;
        inner.sessions.get(session_id).cloned()
    }

    /// Refresh the session's heartbeat stamp.
    pub fn update_heartbeat(&self, session_id: &str) {
        let mut inner = self.write();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.last_heartbeat = Utc::now();
        }
    }

    /// Count one outbound frame.
    pub fn bump_sent(&self, session_id: &str) {
        let mut inner = self.write();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.messages_sent += 1;
        }
    }

    /// Count one parsed inbound frame.
    pub fn bump_received(&self, session_id: &str) {
        let mut inner = self.write();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.messages_received += 1;
        }
    }

    /// Record a committed progress sync on the session.
    pub fn record_sync(&self, session_id: &str, manga_id: &str, manga_title: &str, chapter: i64) {
        let mut inner = self.write();
        if let Some(session) = inner.sessions.get_mut(session_id) {
            session.last_sync = Some(LastSync {
                manga_id: manga_id.to_string(),
                manga_title: manga_title.to_string(),
                chapter,
                time: Utc::now(),
            });
        }
    }

    /// Flip the session's subscribed flag on. Empty `event_types` defaults
    /// to `{progress, library}`.
    pub fn subscribe(&self, client_id: &str, event_types: Vec<String>) -> bool {
        let mut inner = self.write();
        let Some(session_id) = inner.client_to_session.get(client_id).cloned() else {
            return false;
        };
        match inner.sessions.get_mut(&session_id) {
            Some(session) => {
                session.subscribed = true;
                session.event_types = if event_types.is_empty() {
                    vec![EVENT_PROGRESS.to_string(), EVENT_LIBRARY.to_string()]
                } else {
                    event_types
                };
                true
            }
            None => false,
        }
    }

    /// Flip the session's subscribed flag off and clear the filter.
    pub fn unsubscribe(&self, client_id: &str) -> bool {
        let mut inner = self.write();
        let Some(session_id) = inner.client_to_session.get(client_id).cloned() else {
            return false;
        };
        match inner.sessions.get_mut(&session_id) {
            Some(session) => {
                session.subscribed = false;
                session.event_types.clear();
                true
            }
            None => false,
        }
    }

    /// Snapshot of every client whose session is subscribed.
    pub fn subscribed_clients(&self) -> Vec<String> {
        let inner = self.read();
        inner
            .client_to_session
            .iter()
            .filter(|(_, session_id)| {
                inner
                    .sessions
                    .get(*session_id)
                    .is_some_and(|s| s.subscribed)
            })
            .map(|(client_id, _)| client_id.clone())
            .collect()
    }

    /// Live sessions for a user across all devices.
    pub fn devices_online(&self, user_id: &str) -> usize {
        let inner = self.read();
        inner
            .user_to_sessions
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| inner.sessions.contains_key(*id))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Remove the session bound to a connection, symmetrically across all
    /// three maps. Returns the removed session.
    pub fn remove_by_client(&self, client_id: &str) -> Option<Session> {
        let mut inner = self.write();
        let session_id = inner.client_to_session.remove(client_id)?;
        remove_session(&mut inner, &session_id)
    }

    /// Administrative probe: drop every session whose heartbeat is older
    /// than `timeout`. Routine eviction is owned by the liveness monitor,
    /// which also tears down the transport slot.
    pub fn sweep_stale(&self, timeout: Duration) -> Vec<String> {
        let mut inner = self.write();
        let now = Utc::now();
        let stale: Vec<String> = inner
            .sessions
            .values()
            .filter(|s| {
                (now - s.last_heartbeat)
                    .to_std()
                    .map(|age| age > timeout)
                    .unwrap_or(false)
            })
            .map(|s| s.session_id.clone())
            .collect();

        for session_id in &stale {
            remove_session(&mut inner, session_id);
        }
        stale
    }

    /// Total live sessions.
    pub fn count(&self) -> usize {
        self.read().sessions.len()
    }
}

fn remove_session(inner: &mut Inner, session_id: &str) -> Option<Session> {
    let session = inner.sessions.remove(session_id)?;

    if let Some(ids) = inner.user_to_sessions.get_mut(&session.user_id) {
        ids.retain(|id| id != session_id);
        if ids.is_empty() {
            inner.user_to_sessions.remove(&session.user_id);
        }
    }

    inner
        .client_to_session
        .retain(|_, sid| sid != session_id);

    Some(session)
}

impl SessionLookup for SessionRegistry {
    fn subscribed_clients(&self) -> Vec<String> {
        SessionRegistry::subscribed_clients(self)
    }

    fn is_subscribed(&self, client_id: &str) -> bool {
        self.lookup_by_client(client_id)
            .is_some_and(|s| s.subscribed)
    }

    fn session_by_client(&self, client_id: &str) -> Option<SessionView> {
        self.lookup_by_client(client_id).map(|s| SessionView {
            user_id: s.user_id,
            device_type: s.device_type,
            subscribed: s.subscribed,
            event_types: s.event_types,
        })
    }
}

/// Lowercase a string and collapse anything outside `[a-z0-9]` to `_`.
/// Empty input yields `unknown`. Idempotent.
pub fn sanitize(s: &str) -> String {
    let out: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "unknown".to_string()
    } else {
        out
    }
}

/// Pure session-id builder: `sess_<name>_<type>_<ddmmyyyyThhmmss>_<tail>`.
/// Clock and randomness are injected so fixtures can pin them.
pub fn session_id_at(
    device_name: &str,
    device_type: &str,
    now: DateTime<Utc>,
    tail: &str,
) -> String {
    format!(
        "sess_{}_{}_{}_{}",
        sanitize(device_name),
        sanitize(device_type),
        now.format("%d%m%YT%H%M%S"),
        tail,
    )
}

fn random_tail() -> String {
    let mut bytes = [0u8; 2];
    if getrandom::getrandom(&mut bytes).is_err() {
        return "0000".to_string();
    }
    format!("{:02x}{:02x}", bytes[0], bytes[1])
}

/// Allocate a fresh session id from the wall clock and a 4-hex random tail.
pub fn generate_session_id(device_name: &str, device_type: &str) -> String {
    session_id_at(device_name, device_type, Utc::now(), &random_tail())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_session() -> (SessionRegistry, Session) {
        let registry = SessionRegistry::default();
        let session = registry.create("c1", "u1", "desktop", "Alice-PC");
        (registry, session)
    }

    #[test]
    fn create_indexes_all_three_maps() {
        let (registry, session) = registry_with_session();

        assert!(session.session_id.starts_with("sess_alice_pc_desktop_"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.devices_online("u1"), 1);
        assert_eq!(
            registry.lookup_by_client("c1").unwrap().session_id,
            session.session_id
        );
    }

    #[test]
    fn remove_by_client_is_symmetric() {
        let (registry, _) = registry_with_session();

        let removed = registry.remove_by_client("c1").unwrap();
        assert_eq!(removed.user_id, "u1");
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.devices_online("u1"), 0);
        assert!(registry.lookup_by_client("c1").is_none());
        assert!(registry.remove_by_client("c1").is_none());
    }

    #[test]
    fn second_create_on_same_client_replaces_session() {
        let (registry, first) = registry_with_session();
        let second = registry.create("c1", "u1", "mobile", "Alice-Phone");

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.devices_online("u1"), 1);
    }

    #[test]
    fn devices_online_counts_per_user() {
        let registry = SessionRegistry::default();
        registry.create("c1", "u1", "desktop", "pc");
        registry.create("c2", "u1", "mobile", "phone");
        registry.create("c3", "u2", "desktop", "pc");

        assert_eq!(registry.devices_online("u1"), 2);
        assert_eq!(registry.devices_online("u2"), 1);
        assert_eq!(registry.devices_online("u3"), 0);
    }

    #[test]
    fn subscribe_empty_defaults_to_progress_and_library() {
        let (registry, _) = registry_with_session();

        assert!(registry.subscribe("c1", Vec::new()));
        let session = registry.lookup_by_client("c1").unwrap();
        assert!(session.subscribed);
        assert_eq!(session.event_types, vec!["progress", "library"]);
        assert_eq!(registry.subscribed_clients(), vec!["c1".to_string()]);
    }

    #[test]
    fn unsubscribe_clears_filter() {
        let (registry, _) = registry_with_session();
        registry.subscribe("c1", vec!["progress".to_string()]);

        assert!(registry.unsubscribe("c1"));
        let session = registry.lookup_by_client("c1").unwrap();
        assert!(!session.subscribed);
        assert!(session.event_types.is_empty());
        assert!(registry.subscribed_clients().is_empty());
    }

    #[test]
    fn subscribe_unknown_client_fails() {
        let registry = SessionRegistry::default();
        assert!(!registry.subscribe("nope", Vec::new()));
        assert!(!registry.unsubscribe("nope"));
    }

    #[test]
    fn counters_and_sync_record() {
        let (registry, session) = registry_with_session();

        registry.bump_sent(&session.session_id);
        registry.bump_received(&session.session_id);
        registry.bump_received(&session.session_id);
        registry.record_sync(&session.session_id, "m1", "Berserk", 42);

        let session = registry.lookup_by_client("c1").unwrap();
        assert_eq!(session.messages_sent, 1);
        assert_eq!(session.messages_received, 2);
        let sync = session.last_sync.unwrap();
        assert_eq!(sync.manga_title, "Berserk");
        assert_eq!(sync.chapter, 42);
    }

    #[test]
    fn sweep_stale_drops_old_sessions_symmetrically() {
        let (registry, session) = registry_with_session();

        // Fresh sessions survive a sweep.
        assert!(registry.sweep_stale(Duration::from_secs(60)).is_empty());

        // Backdate the heartbeat past the timeout.
        {
            let mut inner = registry.write();
            let s = inner.sessions.get_mut(&session.session_id).unwrap();
            s.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        }

        let stale = registry.sweep_stale(Duration::from_secs(60));
        assert_eq!(stale, vec![session.session_id]);
        assert_eq!(registry.count(), 0);
        assert_eq!(registry.devices_online("u1"), 0);
        assert!(registry.lookup_by_client("c1").is_none());
    }

    #[test]
    fn sanitize_collapses_and_lowercases() {
        assert_eq!(sanitize("Alice-PC"), "alice_pc");
        assert_eq!(sanitize("My Phone 2"), "my_phone_2");
        assert_eq!(sanitize("désktop"), "d_sktop");
        assert_eq!(sanitize(""), "unknown");
        assert_eq!(sanitize("___"), "___");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for input in ["Alice-PC", "My Phone 2", "", "already_clean_42", "日本語"] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once);
        }
    }

    #[test]
    fn session_id_is_pure_given_clock_and_tail() {
        let now = DateTime::parse_from_rfc3339("2025-03-09T14:30:05Z")
            .unwrap()
            .with_timezone(&Utc);

        let id = session_id_at("Alice-PC", "desktop", now, "ab12");
        assert_eq!(id, "sess_alice_pc_desktop_09032025T143005_ab12");
        assert_eq!(session_id_at("Alice-PC", "desktop", now, "ab12"), id);
    }

    #[test]
    fn generated_session_ids_are_distinct() {
        let ids: Vec<String> = (0..3)
            .map(|_| generate_session_id("pc", "desktop"))
            .collect();
        // Same second, random tails: all three colliding is ~1 in 2^32.
        assert!(ids.iter().any(|id| *id != ids[0]));
    }

    #[test]
    fn lookup_view_for_fanout() {
        let (registry, _) = registry_with_session();
        registry.subscribe("c1", Vec::new());

        let view = SessionLookup::session_by_client(&registry, "c1").unwrap();
        assert_eq!(view.user_id, "u1");
        assert_eq!(view.device_type, "desktop");
        assert!(view.subscribed);
        assert!(SessionLookup::is_subscribed(&registry, "c1"));
    }
}
