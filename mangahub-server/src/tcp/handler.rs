//! Per-connection decode loop and message routing.

use super::server::SlotTable;
use super::slot::{ConnectionSlot, Identity};
use super::SessionContext;
use crate::bridge::{LibraryAction, LibraryChange, ProgressUpdate, UpdateSink};
use chrono::{SecondsFormat, Utc};
use mangahub_types::messages::{
    AddToLibraryPayload, AuthPayload, ConnectPayload, ConnectResponsePayload, DisconnectPayload,
    GetProgressPayload, HeartbeatPayload, LastSyncInfo, LibraryItem, ProgressInfo,
    RemoveFromLibraryPayload, StatusResponsePayload, SubscribeUpdatesPayload, SyncProgressPayload,
};
use mangahub_types::{Envelope, ReadingStatus, SessionError};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;

/// Run the decode loop for one connection until EOF, a read fault, or
/// eviction. Owns the full cleanup on the way out.
pub async fn drive_connection(
    ctx: Arc<SessionContext>,
    slot: Arc<ConnectionSlot>,
    read_half: OwnedReadHalf,
    slots: SlotTable,
) {
    let client_id = slot.client_id().to_string();
    tracing::info!(client_id = %client_id, peer = %slot.peer_addr(), "client connected");

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                tracing::debug!(client_id = %client_id, "connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                let fault = SessionError::NetworkRead(err.to_string());
                tracing::warn!(client_id = %client_id, error = %fault, "connection read error");
                break;
            }
        }

        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        let message = match Envelope::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                let fault = SessionError::InvalidFormat(err.to_string());
                tracing::warn!(client_id = %client_id, raw, error = %fault, "message parse error");
                if slot.write_frame(&fault.to_envelope()).await.is_err() {
                    break;
                }
                continue;
            }
        };

        ctx.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
        if let Some(session) = ctx.registry.lookup_by_client(&client_id) {
            ctx.registry.bump_received(&session.session_id);
        }

        match route_message(&ctx, &slot, &message).await {
            Ok(()) => {}
            Err(fault) => {
                tracing::warn!(
                    client_id = %client_id,
                    message_type = %message.kind,
                    code = fault.code(),
                    error = %fault,
                    "message handling error"
                );
                if fault.is_fatal() {
                    break;
                }
                if slot.write_frame(&fault.to_envelope()).await.is_err() {
                    break;
                }
            }
        }

        if let Some(session) = ctx.registry.lookup_by_client(&client_id) {
            ctx.registry.bump_sent(&session.session_id);
        }
    }

    cleanup_connection(&ctx, &slot);
    slots.remove(&client_id);
    ctx.metrics
        .active_connections
        .store(slots.len() as i64, Ordering::Relaxed);
    tracing::info!(client_id = %client_id, "client disconnected");
}

/// Tear down everything a connection holds: bridge registration, session,
/// liveness entry. Idempotent; also driven by the liveness sweeper.
pub(super) fn cleanup_connection(ctx: &SessionContext, slot: &ConnectionSlot) {
    if let Some(identity) = slot.identity() {
        ctx.bridge
            .unregister_slot(&identity.user_id, slot.client_id());
    }
    ctx.registry.remove_by_client(slot.client_id());
    ctx.monitor.remove(slot.client_id());
}

async fn route_message(
    ctx: &SessionContext,
    slot: &Arc<ConnectionSlot>,
    message: &Envelope,
) -> Result<(), SessionError> {
    match message.kind.as_str() {
        "ping" => handle_ping(slot).await,
        "auth" => handle_auth(ctx, slot, message).await,
        "connect" => handle_connect(ctx, slot, message).await,
        "disconnect" => handle_disconnect(ctx, slot, message).await,
        "heartbeat" => handle_heartbeat(ctx, slot, message).await,
        "status_request" => handle_status_request(ctx, slot).await,
        "subscribe_updates" => handle_subscribe_updates(ctx, slot, message).await,
        "unsubscribe_updates" => handle_unsubscribe_updates(ctx, slot).await,
        "sync_progress" => handle_sync_progress(ctx, slot, message).await,
        "get_library" => handle_get_library(ctx, slot).await,
        "get_progress" => handle_get_progress(ctx, slot, message).await,
        "add_to_library" => handle_add_to_library(ctx, slot, message).await,
        "remove_from_library" => handle_remove_from_library(ctx, slot, message).await,
        other => Err(SessionError::UnknownType(other.to_string())),
    }
}

fn require_auth(slot: &ConnectionSlot) -> Result<Identity, SessionError> {
    slot.identity().ok_or(SessionError::NotAuthenticated)
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    message: &Envelope,
    what: &str,
) -> Result<T, SessionError> {
    message
        .payload_as()
        .map_err(|_| SessionError::InvalidPayload(format!("invalid {what} payload")))
}

fn reply_frame<T: Serialize>(kind: &str, body: &T) -> Result<Envelope, SessionError> {
    Envelope::data(kind, body).map_err(|e| SessionError::Other(e.to_string()))
}

fn validate_status(status: Option<&str>) -> Result<Option<ReadingStatus>, SessionError> {
    match status {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| SessionError::InvalidStatus(value.to_string())),
    }
}

async fn handle_ping(slot: &ConnectionSlot) -> Result<(), SessionError> {
    tracing::debug!(client_id = slot.client_id(), "ping received");
    slot.write_frame(&Envelope::pong()).await
}

async fn handle_auth(
    ctx: &SessionContext,
    slot: &Arc<ConnectionSlot>,
    message: &Envelope,
) -> Result<(), SessionError> {
    let body: AuthPayload = decode_payload(message, "auth")?;
    if body.token.is_empty() {
        return Err(SessionError::TokenMissing);
    }

    let claims = ctx.verifier.verify(&body.token).map_err(|err| {
        tracing::warn!(client_id = slot.client_id(), error = %err, "authentication failed");
        SessionError::from(err)
    })?;

    // Re-auth replaces any previous binding.
    if let Some(old) = slot.identity() {
        ctx.bridge.unregister_slot(&old.user_id, slot.client_id());
    }

    slot.set_identity(Identity {
        user_id: claims.user_id.clone(),
        username: claims.username.clone(),
    });
    ctx.bridge
        .register_slot(&claims.user_id, Arc::clone(slot) as Arc<dyn UpdateSink>);

    tracing::info!(
        client_id = slot.client_id(),
        user_id = %claims.user_id,
        username = %claims.username,
        "client authenticated"
    );
    slot.write_frame(&Envelope::success("authentication successful"))
        .await
}

async fn handle_connect(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: ConnectPayload = decode_payload(message, "connect")?;

    let session = ctx.registry.create(
        slot.client_id(),
        &identity.user_id,
        &body.device_type,
        &body.device_name,
    );
    ctx.monitor
        .record(slot.client_id(), Some(Duration::ZERO));
    ctx.metrics.sessions_created.fetch_add(1, Ordering::Relaxed);

    tracing::info!(
        client_id = slot.client_id(),
        session_id = %session.session_id,
        device_type = %body.device_type,
        device_name = %body.device_name,
        "session established"
    );

    let response = ConnectResponsePayload {
        session_id: session.session_id,
        device_type: body.device_type,
        connected_at: session
            .connected_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    slot.write_frame(&reply_frame("connect_response", &response)?)
        .await
}

async fn handle_disconnect(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    require_auth(slot)?;
    let body: DisconnectPayload = decode_payload(message, "disconnect")?;

    if let Some(session) = ctx.registry.remove_by_client(slot.client_id()) {
        tracing::info!(
            client_id = slot.client_id(),
            session_id = %session.session_id,
            reason = body.reason.as_deref().unwrap_or("none"),
            "session closed by client"
        );
    }

    // The slot stays open until the peer closes the transport.
    slot.write_frame(&Envelope::success("disconnected successfully"))
        .await
}

async fn handle_heartbeat(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    require_auth(slot)?;
    let body: HeartbeatPayload = decode_payload(message, "heartbeat")?;

    let rtt = body
        .sent_at
        .and_then(|sent| (Utc::now() - sent).to_std().ok())
        .unwrap_or(Duration::ZERO);
    ctx.monitor.record(slot.client_id(), Some(rtt));

    if let Some(session) = ctx.registry.lookup_by_client(slot.client_id()) {
        ctx.registry.update_heartbeat(&session.session_id);
    }

    tracing::debug!(client_id = slot.client_id(), "heartbeat received");
    slot.write_frame(&Envelope::heartbeat_echo()).await
}

async fn handle_status_request(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let session = ctx
        .registry
        .lookup_by_client(slot.client_id())
        .ok_or_else(|| SessionError::InvalidPayload("no active session".to_string()))?;

    let last_heartbeat = ctx
        .monitor
        .last_heartbeat(slot.client_id())
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true));
    let rtt_ms = ctx
        .monitor
        .rtt(slot.client_id())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    let quality = ctx.monitor.quality(slot.client_id());

    let status = StatusResponsePayload {
        connection_status: "active".to_string(),
        server_address: slot.local_addr().to_string(),
        uptime_seconds: (Utc::now() - session.connected_at).num_seconds(),
        last_heartbeat,
        session_id: session.session_id.clone(),
        devices_online: ctx.registry.devices_online(&identity.user_id) as i64,
        messages_sent: session.messages_sent,
        messages_received: session.messages_received,
        last_sync: session.last_sync.map(|sync| LastSyncInfo {
            manga_id: sync.manga_id,
            manga_title: sync.manga_title,
            chapter: sync.chapter,
            timestamp: sync.time.to_rfc3339_opts(SecondsFormat::Secs, true),
        }),
        network_quality: quality.as_str().to_string(),
        rtt_ms,
    };

    tracing::debug!(
        client_id = slot.client_id(),
        session_id = %status.session_id,
        uptime = status.uptime_seconds,
        network_quality = %quality,
        "status request handled"
    );
    slot.write_frame(&reply_frame("status", &status)?).await
}

async fn handle_subscribe_updates(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: SubscribeUpdatesPayload = decode_payload(message, "subscribe")?;

    if !ctx.registry.subscribe(slot.client_id(), body.event_types) {
        return Err(SessionError::InvalidPayload(
            "failed to subscribe".to_string(),
        ));
    }

    tracing::info!(
        client_id = slot.client_id(),
        user_id = %identity.user_id,
        "client subscribed to updates"
    );
    slot.write_frame(&Envelope::success("subscribed to updates"))
        .await
}

async fn handle_unsubscribe_updates(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;

    if !ctx.registry.unsubscribe(slot.client_id()) {
        return Err(SessionError::InvalidPayload(
            "failed to unsubscribe".to_string(),
        ));
    }

    tracing::info!(
        client_id = slot.client_id(),
        user_id = %identity.user_id,
        "client unsubscribed from updates"
    );
    slot.write_frame(&Envelope::success("unsubscribed from updates"))
        .await
}

async fn handle_sync_progress(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: SyncProgressPayload = decode_payload(message, "sync_progress")?;

    // When both are violated, the chapter error wins.
    if body.current_chapter < 0 {
        return Err(SessionError::InvalidChapter(body.current_chapter));
    }
    if body.manga_id.is_empty() {
        return Err(SessionError::InvalidMangaId);
    }
    let status = validate_status(body.status.as_deref())?;

    let title = ctx
        .store
        .manga_exists(&body.manga_id)
        .await
        .map_err(SessionError::from)?
        .ok_or_else(|| SessionError::MangaNotFound(body.manga_id.clone()))?;

    let now = Utc::now();
    ctx.store
        .upsert_progress(
            &identity.user_id,
            &body.manga_id,
            body.current_chapter,
            status,
            ReadingStatus::Reading,
            now,
        )
        .await
        .map_err(SessionError::from)?;

    let effective = status.unwrap_or(ReadingStatus::Reading);
    tracing::info!(
        user_id = %identity.user_id,
        manga_id = %body.manga_id,
        chapter = body.current_chapter,
        status = effective.as_str(),
        "progress synced"
    );

    if let Some(session) = ctx.registry.lookup_by_client(slot.client_id()) {
        ctx.registry.record_sync(
            &session.session_id,
            &body.manga_id,
            &title,
            body.current_chapter,
        );
    }

    slot.write_frame(&Envelope::success("progress synced successfully"))
        .await?;

    ctx.bridge
        .notify_progress_update(ProgressUpdate {
            user_id: identity.user_id,
            origin_client_id: Some(slot.client_id().to_string()),
            manga_id: body.manga_id,
            manga_title: title,
            chapter: body.current_chapter,
            status: effective.as_str().to_string(),
            updated_at: now,
        })
        .await;
    Ok(())
}

async fn handle_get_library(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;

    let rows = ctx
        .store
        .list_library(&identity.user_id)
        .await
        .map_err(SessionError::from)?;

    let items: Vec<LibraryItem> = rows
        .into_iter()
        .map(|row| LibraryItem {
            manga_id: row.manga_id,
            title: row.title,
            author: row.author,
            genres: row.genres,
            manga_status: row.manga_status,
            total_chapters: row.total_chapters,
            description: row.description,
            cover_url: row.cover_url,
            current_chapter: row.current_chapter,
            read_status: row.read_status,
            updated_at: row.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
        .collect();

    tracing::info!(
        user_id = %identity.user_id,
        item_count = items.len(),
        "library fetched"
    );
    slot.write_frame(&reply_frame("library", &items)?).await
}

async fn handle_get_progress(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: GetProgressPayload = decode_payload(message, "get_progress")?;

    if body.manga_id.is_empty() {
        return Err(SessionError::InvalidMangaId);
    }

    let row = ctx
        .store
        .get_progress(&identity.user_id, &body.manga_id)
        .await
        .map_err(SessionError::from)?
        .ok_or(SessionError::DbNotFound)?;

    let progress = ProgressInfo {
        current_chapter: row.current_chapter,
        status: row.status,
        updated_at: row.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    tracing::debug!(
        user_id = %identity.user_id,
        manga_id = %body.manga_id,
        "progress retrieved"
    );
    slot.write_frame(&reply_frame("progress", &progress)?).await
}

async fn handle_add_to_library(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: AddToLibraryPayload = decode_payload(message, "add_to_library")?;

    if body.manga_id.is_empty() {
        return Err(SessionError::InvalidMangaId);
    }
    let status = validate_status(body.status.as_deref())?.unwrap_or(ReadingStatus::PlanToRead);

    let title = ctx
        .store
        .manga_exists(&body.manga_id)
        .await
        .map_err(SessionError::from)?
        .ok_or_else(|| SessionError::MangaNotFound(body.manga_id.clone()))?;

    ctx.store
        .add_to_library(&identity.user_id, &body.manga_id, status, Utc::now())
        .await
        .map_err(SessionError::from)?;

    tracing::info!(
        user_id = %identity.user_id,
        manga_id = %body.manga_id,
        status = status.as_str(),
        "manga added to library"
    );

    slot.write_frame(&Envelope::success("manga added to library successfully"))
        .await?;

    ctx.bridge
        .notify_library_update(LibraryChange {
            user_id: identity.user_id,
            origin_client_id: Some(slot.client_id().to_string()),
            manga_id: body.manga_id,
            manga_title: title,
            action: LibraryAction::Added,
        })
        .await;
    Ok(())
}

async fn handle_remove_from_library(
    ctx: &SessionContext,
    slot: &ConnectionSlot,
    message: &Envelope,
) -> Result<(), SessionError> {
    let identity = require_auth(slot)?;
    let body: RemoveFromLibraryPayload = decode_payload(message, "remove_from_library")?;

    if body.manga_id.is_empty() {
        return Err(SessionError::InvalidMangaId);
    }

    let title = ctx
        .store
        .manga_exists(&body.manga_id)
        .await
        .map_err(SessionError::from)?
        .ok_or_else(|| SessionError::MangaNotFound(body.manga_id.clone()))?;

    let removed = ctx
        .store
        .delete_progress(&identity.user_id, &body.manga_id)
        .await
        .map_err(SessionError::from)?;
    if removed == 0 {
        return Err(SessionError::NotInLibrary(body.manga_id));
    }

    tracing::info!(
        user_id = %identity.user_id,
        manga_id = %body.manga_id,
        "manga removed from library"
    );

    slot.write_frame(&Envelope::success("manga removed from library successfully"))
        .await?;

    ctx.bridge
        .notify_library_update(LibraryChange {
            user_id: identity.user_id,
            origin_client_id: Some(slot.client_id().to_string()),
            manga_id: body.manga_id,
            manga_title: title,
            action: LibraryAction::Removed,
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_validation_accepts_known_values() {
        assert_eq!(validate_status(None).unwrap(), None);
        assert_eq!(validate_status(Some("")).unwrap(), None);
        assert_eq!(
            validate_status(Some("reading")).unwrap(),
            Some(ReadingStatus::Reading)
        );
        assert_eq!(
            validate_status(Some("plan_to_read")).unwrap(),
            Some(ReadingStatus::PlanToRead)
        );
    }

    #[test]
    fn status_validation_rejects_unknown_values() {
        let err = validate_status(Some("dropped")).unwrap_err();
        assert_eq!(err.code(), "BIZ-003");
    }
}
