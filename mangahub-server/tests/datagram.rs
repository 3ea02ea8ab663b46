//! End-to-end exercises of the connectionless notification protocol.

mod common;

use common::{start_server, token_for};
use mangahub_client::{ClientError, NotifyListener, SessionClient};
use mangahub_server::config::DatagramConfig;
use mangahub_server::udp::spawn_subscriber_sweeper;
use std::time::Duration;

async fn mutating_client(server: &common::TestServer) -> SessionClient {
    let mut client = SessionClient::connect(server.tcp_addr).await.unwrap();
    client.auth(&token_for("u1", "alice")).await.unwrap();
    client.connect_device("desktop", "pc").await.unwrap();
    client
}

#[tokio::test]
async fn register_requires_a_valid_token() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();

    let err = listener.register("garbage").await.unwrap_err();
    match err {
        ClientError::Datagram { code, .. } => assert_eq!(code, "UDP-004"),
        other => panic!("expected datagram error, got {other}"),
    }

    listener.register(&token_for("u1", "alice")).await.unwrap();
    assert_eq!(server.udp.registry().count(), 1);
}

#[tokio::test]
async fn registration_starts_with_the_all_filter() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();

    let mut device = mutating_client(&server).await;
    device.sync_progress("m1", 12, None).await.unwrap();

    let notification = listener
        .recv_notification(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(notification.kind, "notification");
    assert_eq!(notification.event_type.as_deref(), Some("progress_update"));
    assert_eq!(notification.user_id.as_deref(), Some("u1"));
    let data = notification.data.unwrap();
    assert_eq!(data["manga_id"], "m1");
    assert_eq!(data["chapter_id"], 12);
}

#[tokio::test]
async fn filter_rejects_then_admits_after_all() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();
    listener.subscribe(&["progress_update"]).await.unwrap();

    let mut device = mutating_client(&server).await;

    // A library mutation does not pass the progress-only filter.
    device.add_to_library("m1", None).await.unwrap();
    let err = listener
        .recv_notification(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    // Widen the filter and mutate again: the notification is delivered.
    listener.subscribe(&["all"]).await.unwrap();
    device.add_to_library("m2", None).await.unwrap();

    let notification = listener
        .recv_notification(Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(notification.event_type.as_deref(), Some("library_update"));
    assert_eq!(notification.data.unwrap()["action"], "added");
}

#[tokio::test]
async fn notifications_are_scoped_to_the_user() {
    let server = start_server().await;
    let alice = NotifyListener::connect(server.udp_addr).await.unwrap();
    alice.register(&token_for("u1", "alice")).await.unwrap();
    let bob = NotifyListener::connect(server.udp_addr).await.unwrap();
    bob.register(&token_for("u2", "bob")).await.unwrap();

    let mut device = mutating_client(&server).await;
    device.sync_progress("m1", 3, None).await.unwrap();

    alice.recv_notification(Duration::from_secs(2)).await.unwrap();
    let err = bob
        .recv_notification(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
}

#[tokio::test]
async fn unknown_type_yields_udp_002() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();

    listener
        .send_raw(br#"{"type":"dance","timestamp":"2025-01-01T00:00:00Z"}"#)
        .await
        .unwrap();
    let reply = listener.recv_raw(Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.kind, "error");
    assert_eq!(reply.data.unwrap()["code"], "UDP-002");
}

#[tokio::test]
async fn malformed_packet_yields_udp_002() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();

    listener.send_raw(b"{not json}").await.unwrap();
    let reply = listener.recv_raw(Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply.kind, "error");
    assert_eq!(reply.data.unwrap()["code"], "UDP-002");
}

#[tokio::test]
async fn subscribe_validates_event_types() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();

    let err = listener.subscribe(&["chapter_drop"]).await.unwrap_err();
    match err {
        ClientError::Datagram { code, message } => {
            assert_eq!(code, "UDP-008");
            assert!(message.contains("chapter_drop"));
        }
        other => panic!("expected datagram error, got {other}"),
    }
}

#[tokio::test]
async fn operations_require_registration() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();

    let err = listener.subscribe(&["all"]).await.unwrap_err();
    match err {
        ClientError::Datagram { code, .. } => assert_eq!(code, "UDP-006"),
        other => panic!("expected datagram error, got {other}"),
    }

    let err = listener.heartbeat().await.unwrap_err();
    match err {
        ClientError::Datagram { code, .. } => assert_eq!(code, "UDP-007"),
        other => panic!("expected datagram error, got {other}"),
    }

    let err = listener.unregister().await.unwrap_err();
    match err {
        ClientError::Datagram { code, .. } => assert_eq!(code, "UDP-003"),
        other => panic!("expected datagram error, got {other}"),
    }
}

#[tokio::test]
async fn unregister_stops_delivery() {
    let server = start_server().await;
    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();
    listener.unregister().await.unwrap();
    assert_eq!(server.udp.registry().count(), 0);

    let mut device = mutating_client(&server).await;
    device.sync_progress("m1", 3, None).await.unwrap();

    let err = listener
        .recv_notification(Duration::from_millis(300))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
}

#[tokio::test]
async fn ttl_sweeper_evicts_silent_endpoints() {
    let server = start_server().await;
    let _ = spawn_subscriber_sweeper(
        server.udp.registry(),
        DatagramConfig {
            sweep_interval: Duration::from_millis(100),
            endpoint_ttl: Duration::from_millis(300),
        },
    );

    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();
    assert_eq!(server.udp.registry().count(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server.udp.registry().count(), 0);
}

#[tokio::test]
async fn heartbeats_keep_the_endpoint_alive() {
    let server = start_server().await;
    let _ = spawn_subscriber_sweeper(
        server.udp.registry(),
        DatagramConfig {
            sweep_interval: Duration::from_millis(100),
            endpoint_ttl: Duration::from_millis(400),
        },
    );

    let listener = NotifyListener::connect(server.udp_addr).await.unwrap();
    listener.register(&token_for("u1", "alice")).await.unwrap();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(150)).await;
        listener.heartbeat().await.unwrap();
    }
    assert_eq!(server.udp.registry().count(), 1);
}
