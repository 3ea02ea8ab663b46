//! The in-process event bridge.
//!
//! Couples mutations performed over either transport (or the HTTP admin
//! surface) to every interested device. One mutation fans out three ways:
//!
//! - the raw `progress_update`/`library_update` frame to every duplex slot
//!   registered for the user (via the buffered event channel and the single
//!   consumer task),
//! - the condensed `update_event` frame to subscribed sessions of the same
//!   user, with per-recipient direction,
//! - a `notification` datagram to registered endpoints, filtered by event
//!   type.
//!
//! The bridge owns no session or endpoint state. It borrows recipient maps
//! from the two registries through the capability traits below and holds
//! nothing across calls.

use crate::metrics::ServerMetrics;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mangahub_types::messages::{
    Direction, NotificationData, UpdateEventPayload, DG_EVENT_LIBRARY_UPDATE,
    DG_EVENT_PROGRESS_UPDATE, EVENT_LIBRARY, EVENT_PROGRESS,
};
use mangahub_types::{Envelope, SessionError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

const EVENT_QUEUE_CAPACITY: usize = 100;

/// Kind of a mutation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A `sync_progress` commit.
    ProgressUpdate,
    /// An `add_to_library`/`remove_from_library` commit.
    LibraryUpdate,
}

impl EventKind {
    /// The wire discriminator, also the datagram filter token.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ProgressUpdate => DG_EVENT_PROGRESS_UPDATE,
            EventKind::LibraryUpdate => DG_EVENT_LIBRARY_UPDATE,
        }
    }

    /// The session-side filter token this kind matches.
    pub fn session_filter(&self) -> &'static str {
        match self {
            EventKind::ProgressUpdate => EVENT_PROGRESS,
            EventKind::LibraryUpdate => EVENT_LIBRARY,
        }
    }
}

/// Library mutation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryAction {
    /// The manga entered the library.
    Added,
    /// The manga left the library.
    Removed,
}

impl LibraryAction {
    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryAction::Added => "added",
            LibraryAction::Removed => "removed",
        }
    }
}

/// A committed `sync_progress` mutation.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Owning user.
    pub user_id: String,
    /// Connection that performed the mutation, when it came over the
    /// session server. `None` for HTTP-surface mutations.
    pub origin_client_id: Option<String>,
    /// Target manga.
    pub manga_id: String,
    /// Title captured at commit time.
    pub manga_title: String,
    /// New chapter position.
    pub chapter: i64,
    /// Effective reading status.
    pub status: String,
    /// Commit instant.
    pub updated_at: DateTime<Utc>,
}

/// A committed library mutation.
#[derive(Debug, Clone)]
pub struct LibraryChange {
    /// Owning user.
    pub user_id: String,
    /// Originating connection, when any.
    pub origin_client_id: Option<String>,
    /// Target manga.
    pub manga_id: String,
    /// Title captured at commit time.
    pub manga_title: String,
    /// What happened.
    pub action: LibraryAction,
}

/// One queued mutation event, consumed by the fan-out loop.
#[derive(Debug, Clone)]
struct QueuedEvent {
    kind: EventKind,
    user_id: String,
    data: Value,
    timestamp: DateTime<Utc>,
}

/// A writer the bridge can push duplex frames through. Implemented by the
/// session server's connection slots.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    /// The owning connection's client id.
    fn sink_id(&self) -> &str;

    /// Write one newline-terminated frame.
    async fn send_line(&self, line: &str) -> Result<(), SessionError>;
}

/// What the bridge needs to know about a session at fan-out time.
#[derive(Debug, Clone)]
pub struct SessionView {
    /// Owning user.
    pub user_id: String,
    /// Device type of the session (used in `update_event`).
    pub device_type: String,
    /// Whether the session opted into `update_event` fan-out.
    pub subscribed: bool,
    /// Event-type filter.
    pub event_types: Vec<String>,
}

/// Capability the session registry presents to the bridge.
pub trait SessionLookup: Send + Sync {
    /// Snapshot of subscribed client ids.
    fn subscribed_clients(&self) -> Vec<String>;
    /// Whether a client's session is currently subscribed.
    fn is_subscribed(&self, client_id: &str) -> bool;
    /// Fan-out view of a client's session.
    fn session_by_client(&self, client_id: &str) -> Option<SessionView>;
}

/// Capability the datagram server presents to the bridge.
#[async_trait]
pub trait DatagramBroadcaster: Send + Sync {
    /// Send one notification to every endpoint of `user_id` whose filter
    /// admits `event_type`. Best-effort.
    async fn broadcast_to_user(&self, user_id: &str, event_type: &str, data: &Value);
}

/// Fan-out hub between mutation producers and connected devices.
pub struct Bridge {
    sinks: RwLock<HashMap<String, Vec<Arc<dyn UpdateSink>>>>,
    tx: mpsc::Sender<QueuedEvent>,
    rx: Mutex<Option<mpsc::Receiver<QueuedEvent>>>,
    datagram: RwLock<Option<Arc<dyn DatagramBroadcaster>>>,
    sessions: RwLock<Option<Arc<dyn SessionLookup>>>,
    stop: Notify,
    metrics: Arc<ServerMetrics>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("users", &self.active_users())
            .field("slots", &self.total_slots())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Create a bridge with the default queue capacity.
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            sinks: RwLock::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            datagram: RwLock::new(None),
            sessions: RwLock::new(None),
            stop: Notify::new(),
            metrics,
        }
    }

    /// Spawn the single consumer task. Call once at startup.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let Some(mut rx) = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::warn!("bridge consumer already started");
            return tokio::spawn(async {});
        };

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("bridge started");
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => bridge.broadcast_to_user(event).await,
                        None => break,
                    },
                    _ = bridge.stop.notified() => break,
                }
            }
            tracing::info!("bridge stopped");
        })
    }

    /// Stop the consumer task.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Wire the datagram leg. Absence disables it gracefully.
    pub fn set_datagram_broadcaster(&self, broadcaster: Arc<dyn DatagramBroadcaster>) {
        *self
            .datagram
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(broadcaster);
        tracing::info!("datagram broadcaster wired to bridge");
    }

    /// Wire the session-registry leg. Absence disables `update_event`
    /// fan-out gracefully.
    pub fn set_session_registry(&self, lookup: Arc<dyn SessionLookup>) {
        *self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(lookup);
        tracing::info!("session registry wired to bridge");
    }

    /// Register an authenticated duplex slot for raw event fan-out.
    pub fn register_slot(&self, user_id: &str, sink: Arc<dyn UpdateSink>) {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let slots = sinks.entry(user_id.to_string()).or_default();
        slots.retain(|s| s.sink_id() != sink.sink_id());
        slots.push(sink);
        tracing::debug!(user_id, total = slots.len(), "duplex slot registered");
    }

    /// Unregister a duplex slot.
    pub fn unregister_slot(&self, user_id: &str, sink_id: &str) {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slots) = sinks.get_mut(user_id) {
            slots.retain(|s| s.sink_id() != sink_id);
            if slots.is_empty() {
                sinks.remove(user_id);
            }
        }
        tracing::debug!(user_id, sink_id, "duplex slot unregistered");
    }

    /// Users with at least one registered slot.
    pub fn active_users(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Registered slots across all users.
    pub fn total_slots(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Publish a committed progress mutation.
    pub async fn notify_progress_update(&self, event: ProgressUpdate) {
        let data = match serde_json::to_value(NotificationData {
            manga_id: Some(event.manga_id.clone()),
            chapter_id: Some(event.chapter),
            status: Some(event.status.clone()),
            action: None,
            last_read_date: Some(
                event.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        }) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize progress event");
                return;
            }
        };

        tracing::debug!(
            user_id = %event.user_id,
            manga_id = %event.manga_id,
            chapter = event.chapter,
            "progress update queued"
        );

        self.enqueue(QueuedEvent {
            kind: EventKind::ProgressUpdate,
            user_id: event.user_id.clone(),
            data: data.clone(),
            timestamp: event.updated_at,
        })
        .await;

        self.send_update_events(
            &event.user_id,
            event.origin_client_id.as_deref(),
            EventKind::ProgressUpdate,
            "updated",
            &event.manga_title,
            event.chapter,
        )
        .await;

        let broadcaster = self
            .datagram
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(broadcaster) = broadcaster {
            broadcaster
                .broadcast_to_user(&event.user_id, EventKind::ProgressUpdate.as_str(), &data)
                .await;
        }
    }

    /// Publish a committed library mutation.
    pub async fn notify_library_update(&self, event: LibraryChange) {
        let data = match serde_json::to_value(NotificationData {
            manga_id: Some(event.manga_id.clone()),
            chapter_id: None,
            status: None,
            action: Some(event.action.as_str().to_string()),
            last_read_date: None,
        }) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize library event");
                return;
            }
        };

        tracing::debug!(
            user_id = %event.user_id,
            manga_id = %event.manga_id,
            action = event.action.as_str(),
            "library update queued"
        );

        self.enqueue(QueuedEvent {
            kind: EventKind::LibraryUpdate,
            user_id: event.user_id.clone(),
            data: data.clone(),
            timestamp: Utc::now(),
        })
        .await;

        self.send_update_events(
            &event.user_id,
            event.origin_client_id.as_deref(),
            EventKind::LibraryUpdate,
            event.action.as_str(),
            &event.manga_title,
            0,
        )
        .await;

        let broadcaster = self
            .datagram
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(broadcaster) = broadcaster {
            broadcaster
                .broadcast_to_user(&event.user_id, EventKind::LibraryUpdate.as_str(), &data)
                .await;
        }
    }

    async fn enqueue(&self, event: QueuedEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::warn!("bridge consumer is gone, raw event dropped");
        }
    }

    /// Consumer side: serialize once, write to every slot of the user.
    /// One failing recipient never aborts delivery to the rest.
    async fn broadcast_to_user(&self, event: QueuedEvent) {
        let sinks: Vec<Arc<dyn UpdateSink>> = {
            let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            map.get(&event.user_id).cloned().unwrap_or_default()
        };

        if sinks.is_empty() {
            tracing::debug!(user_id = %event.user_id, "no duplex slots for user");
            return;
        }

        let frame = serde_json::json!({
            "type": event.kind.as_str(),
            "user_id": event.user_id,
            "data": event.data,
            "timestamp": event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        let line = match serde_json::to_string(&frame) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize event frame, dropping");
                return;
            }
        };

        let mut success = 0u64;
        let mut failed = 0u64;
        let mut dead: Vec<String> = Vec::new();
        for sink in &sinks {
            match sink.send_line(&line).await {
                Ok(()) => {
                    success += 1;
                    self.metrics.broadcasts_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failed += 1;
                    self.metrics
                        .broadcast_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        user_id = %event.user_id,
                        sink_id = sink.sink_id(),
                        error = %err,
                        "failed to deliver event frame"
                    );
                    dead.push(sink.sink_id().to_string());
                }
            }
        }

        // Writes are attempted once; a failed slot leaves the fan-out map.
        for sink_id in dead {
            self.unregister_slot(&event.user_id, &sink_id);
        }

        self.metrics
            .active_connections
            .store(self.total_slots() as i64, Ordering::Relaxed);

        tracing::info!(
            user_id = %event.user_id,
            event_type = event.kind.as_str(),
            success,
            failed,
            "event broadcast complete"
        );
    }

    /// Write the condensed `update_event` to every subscribed session of
    /// the user whose filter admits the event kind. The originating
    /// session sees `outgoing`, siblings see `incoming`.
    async fn send_update_events(
        &self,
        user_id: &str,
        origin_client_id: Option<&str>,
        kind: EventKind,
        action: &str,
        manga_title: &str,
        chapter: i64,
    ) {
        let lookup = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(lookup) = lookup else {
            return;
        };

        let subscribed = lookup.subscribed_clients();
        if subscribed.is_empty() {
            return;
        }

        let sinks: Vec<Arc<dyn UpdateSink>> = {
            let map = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            map.get(user_id).cloned().unwrap_or_default()
        };

        for client_id in subscribed {
            if !lookup.is_subscribed(&client_id) {
                continue;
            }
            let Some(view) = lookup.session_by_client(&client_id) else {
                continue;
            };
            if view.user_id != user_id {
                continue;
            }
            if !view
                .event_types
                .iter()
                .any(|t| t == kind.session_filter())
            {
                continue;
            }

            let direction = if origin_client_id == Some(client_id.as_str()) {
                Direction::Outgoing
            } else {
                Direction::Incoming
            };

            let payload = UpdateEventPayload {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                direction,
                action: action.to_string(),
                manga_title: manga_title.to_string(),
                chapter,
                device_type: view.device_type,
            };

            let line = match Envelope::data("update_event", &payload)
                .and_then(|env| env.to_line())
            {
                Ok(line) => line,
                Err(err) => {
                    tracing::error!(error = %err, "failed to serialize update_event");
                    continue;
                }
            };

            if let Some(sink) = sinks.iter().find(|s| s.sink_id() == client_id) {
                if let Err(err) = sink.send_line(&line).await {
                    self.metrics
                        .broadcast_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        user_id,
                        client_id = %client_id,
                        error = %err,
                        "failed to deliver update_event"
                    );
                    self.unregister_slot(user_id, &client_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        id: String,
        lines: StdMutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSink {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                lines: StdMutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                lines: StdMutex::new(Vec::new()),
                fail: true,
            })
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpdateSink for RecordingSink {
        fn sink_id(&self) -> &str {
            &self.id
        }

        async fn send_line(&self, line: &str) -> Result<(), SessionError> {
            if self.fail {
                return Err(SessionError::NetworkWrite("broken pipe".to_string()));
            }
            self.lines.lock().unwrap().push(line.to_string());
            Ok(())
        }
    }

    struct StaticLookup {
        views: HashMap<String, SessionView>,
    }

    impl SessionLookup for StaticLookup {
        fn subscribed_clients(&self) -> Vec<String> {
            self.views
                .iter()
                .filter(|(_, v)| v.subscribed)
                .map(|(k, _)| k.clone())
                .collect()
        }

        fn is_subscribed(&self, client_id: &str) -> bool {
            self.views.get(client_id).map(|v| v.subscribed).unwrap_or(false)
        }

        fn session_by_client(&self, client_id: &str) -> Option<SessionView> {
            self.views.get(client_id).cloned()
        }
    }

    fn view(user_id: &str, subscribed: bool, event_types: &[&str]) -> SessionView {
        SessionView {
            user_id: user_id.to_string(),
            device_type: "desktop".to_string(),
            subscribed,
            event_types: event_types.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn progress_event(user: &str, origin: Option<&str>) -> ProgressUpdate {
        ProgressUpdate {
            user_id: user.to_string(),
            origin_client_id: origin.map(String::from),
            manga_id: "m1".to_string(),
            manga_title: "One Piece".to_string(),
            chapter: 42,
            status: "reading".to_string(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn register_and_unregister_slots() {
        let bridge = Bridge::new(Arc::new(ServerMetrics::default()));
        let sink_a = RecordingSink::new("a");
        let sink_b = RecordingSink::new("b");

        bridge.register_slot("u1", sink_a.clone());
        bridge.register_slot("u1", sink_b);
        assert_eq!(bridge.total_slots(), 2);
        assert_eq!(bridge.active_users(), 1);

        // Re-registering the same sink id replaces, never duplicates.
        bridge.register_slot("u1", sink_a);
        assert_eq!(bridge.total_slots(), 2);

        bridge.unregister_slot("u1", "a");
        bridge.unregister_slot("u1", "b");
        assert_eq!(bridge.total_slots(), 0);
        assert_eq!(bridge.active_users(), 0);
    }

    #[tokio::test]
    async fn raw_events_reach_every_slot_of_the_user() {
        let metrics = Arc::new(ServerMetrics::default());
        let bridge = Arc::new(Bridge::new(metrics.clone()));
        let _consumer = bridge.start();

        let sink_a = RecordingSink::new("a");
        let sink_b = RecordingSink::new("b");
        let other = RecordingSink::new("c");
        bridge.register_slot("u1", sink_a.clone());
        bridge.register_slot("u1", sink_b.clone());
        bridge.register_slot("u2", other.clone());

        bridge.notify_progress_update(progress_event("u1", None)).await;

        // The consumer runs on its own task; give it a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        for sink in [&sink_a, &sink_b] {
            let lines = sink.lines();
            assert_eq!(lines.len(), 1, "one raw frame per slot");
            let frame: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
            assert_eq!(frame["type"], "progress_update");
            assert_eq!(frame["user_id"], "u1");
            assert_eq!(frame["data"]["chapter_id"], 42);
        }
        assert!(other.lines().is_empty(), "other users receive nothing");
        assert_eq!(metrics.broadcasts_total.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_abort_the_rest() {
        let metrics = Arc::new(ServerMetrics::default());
        let bridge = Arc::new(Bridge::new(metrics.clone()));
        let _consumer = bridge.start();

        let broken = RecordingSink::failing("broken");
        let healthy = RecordingSink::new("healthy");
        bridge.register_slot("u1", broken);
        bridge.register_slot("u1", healthy.clone());

        bridge.notify_progress_update(progress_event("u1", None)).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(healthy.lines().len(), 1);
        assert_eq!(metrics.broadcast_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.broadcasts_total.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn update_event_direction_is_per_recipient() {
        let bridge = Arc::new(Bridge::new(Arc::new(ServerMetrics::default())));

        let origin = RecordingSink::new("origin");
        let sibling = RecordingSink::new("sibling");
        bridge.register_slot("u1", origin.clone());
        bridge.register_slot("u1", sibling.clone());

        let mut views = HashMap::new();
        views.insert("origin".to_string(), view("u1", true, &["progress", "library"]));
        views.insert("sibling".to_string(), view("u1", true, &["progress", "library"]));
        bridge.set_session_registry(Arc::new(StaticLookup { views }));

        bridge
            .send_update_events("u1", Some("origin"), EventKind::ProgressUpdate, "updated", "One Piece", 42)
            .await;

        let origin_frame: serde_json::Value =
            serde_json::from_str(&origin.lines()[0]).unwrap();
        assert_eq!(origin_frame["type"], "update_event");
        assert_eq!(origin_frame["payload"]["direction"], "outgoing");
        assert_eq!(origin_frame["payload"]["manga_title"], "One Piece");
        assert_eq!(origin_frame["payload"]["chapter"], 42);

        let sibling_frame: serde_json::Value =
            serde_json::from_str(&sibling.lines()[0]).unwrap();
        assert_eq!(sibling_frame["payload"]["direction"], "incoming");
    }

    #[tokio::test]
    async fn update_event_respects_session_filter() {
        let bridge = Arc::new(Bridge::new(Arc::new(ServerMetrics::default())));

        let progress_only = RecordingSink::new("p");
        let library_only = RecordingSink::new("l");
        let unsubscribed = RecordingSink::new("u");
        bridge.register_slot("u1", progress_only.clone());
        bridge.register_slot("u1", library_only.clone());
        bridge.register_slot("u1", unsubscribed.clone());

        let mut views = HashMap::new();
        views.insert("p".to_string(), view("u1", true, &["progress"]));
        views.insert("l".to_string(), view("u1", true, &["library"]));
        views.insert("u".to_string(), view("u1", false, &[]));
        bridge.set_session_registry(Arc::new(StaticLookup { views }));

        bridge
            .send_update_events("u1", None, EventKind::LibraryUpdate, "added", "Berserk", 0)
            .await;

        assert!(progress_only.lines().is_empty());
        assert_eq!(library_only.lines().len(), 1);
        assert!(unsubscribed.lines().is_empty());
    }

    #[tokio::test]
    async fn update_event_stays_within_the_user() {
        let bridge = Arc::new(Bridge::new(Arc::new(ServerMetrics::default())));

        let mine = RecordingSink::new("mine");
        let theirs = RecordingSink::new("theirs");
        bridge.register_slot("u1", mine.clone());
        bridge.register_slot("u2", theirs.clone());

        let mut views = HashMap::new();
        views.insert("mine".to_string(), view("u1", true, &["progress"]));
        views.insert("theirs".to_string(), view("u2", true, &["progress"]));
        bridge.set_session_registry(Arc::new(StaticLookup { views }));

        bridge
            .send_update_events("u1", None, EventKind::ProgressUpdate, "updated", "x", 1)
            .await;

        assert_eq!(mine.lines().len(), 1);
        assert!(theirs.lines().is_empty());
    }

    #[tokio::test]
    async fn missing_hooks_disable_legs_gracefully() {
        let bridge = Arc::new(Bridge::new(Arc::new(ServerMetrics::default())));
        let _consumer = bridge.start();

        // No session registry, no datagram broadcaster: only the raw leg
        // runs, and nothing panics.
        bridge.notify_progress_update(progress_event("u1", None)).await;
        bridge
            .notify_library_update(LibraryChange {
                user_id: "u1".to_string(),
                origin_client_id: None,
                manga_id: "m1".to_string(),
                manga_title: "t".to_string(),
                action: LibraryAction::Removed,
            })
            .await;
    }
}
