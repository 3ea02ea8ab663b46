//! Shared fixture: a full sync core on ephemeral ports with an in-memory
//! store.

#![allow(dead_code)]

use chrono::Utc;
use mangahub_server::auth::{issue, Claims, JwtHs256, TokenVerifier};
use mangahub_server::bridge::{Bridge, SessionLookup};
use mangahub_server::liveness::HeartbeatMonitor;
use mangahub_server::metrics::ServerMetrics;
use mangahub_server::registry::SessionRegistry;
use mangahub_server::storage::{ProgressStore, SqliteStore};
use mangahub_server::tcp::{SessionContext, SessionServer};
use mangahub_server::udp::DatagramServer;
use std::net::SocketAddr;
use std::sync::Arc;

pub const TEST_SECRET: &str = "integration-test-secret";

pub struct TestServer {
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub store: Arc<SqliteStore>,
    pub registry: Arc<SessionRegistry>,
    pub monitor: Arc<HeartbeatMonitor>,
    pub metrics: Arc<ServerMetrics>,
    pub tcp: Arc<SessionServer>,
    pub udp: Arc<DatagramServer>,
    pub bridge: Arc<Bridge>,
}

/// Users `u1` (alice) and `u2` (bob); manga `m1` One Piece, `m2` Berserk.
pub async fn start_server() -> TestServer {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store.insert_user("u1", "alice", "x").await.unwrap();
    store.insert_user("u2", "bob", "x").await.unwrap();
    store
        .insert_manga("m1", "One Piece", Some("Eiichiro Oda"))
        .await
        .unwrap();
    store
        .insert_manga("m2", "Berserk", Some("Kentaro Miura"))
        .await
        .unwrap();

    let metrics = Arc::new(ServerMetrics::default());
    let registry = Arc::new(SessionRegistry::default());
    let monitor = Arc::new(HeartbeatMonitor::default());
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtHs256::new(TEST_SECRET));

    let bridge = Arc::new(Bridge::new(Arc::clone(&metrics)));
    let _ = bridge.start();
    bridge.set_session_registry(Arc::clone(&registry) as Arc<dyn SessionLookup>);

    let ctx = Arc::new(SessionContext {
        store: Arc::clone(&store) as Arc<dyn ProgressStore>,
        registry: Arc::clone(&registry),
        monitor: Arc::clone(&monitor),
        bridge: Arc::clone(&bridge),
        verifier: Arc::clone(&verifier),
        metrics: Arc::clone(&metrics),
    });

    let tcp = Arc::new(
        SessionServer::bind("127.0.0.1:0", Arc::clone(&ctx))
            .await
            .unwrap(),
    );
    let _ = tcp.start();

    let udp = Arc::new(
        DatagramServer::bind("127.0.0.1:0", Arc::clone(&verifier), Arc::clone(&metrics))
            .await
            .unwrap(),
    );
    let _ = udp.start();
    bridge.set_datagram_broadcaster(Arc::new(udp.broadcaster()));

    TestServer {
        tcp_addr: tcp.local_addr(),
        udp_addr: udp.local_addr(),
        store,
        registry,
        monitor,
        metrics,
        tcp,
        udp,
        bridge,
    }
}

pub fn token_for(user_id: &str, username: &str) -> String {
    issue(
        &Claims {
            user_id: user_id.to_string(),
            username: username.to_string(),
            exp: Utc::now().timestamp() + 3600,
        },
        TEST_SECRET,
    )
    .unwrap()
}

pub fn expired_token_for(user_id: &str) -> String {
    issue(
        &Claims {
            user_id: user_id.to_string(),
            username: user_id.to_string(),
            exp: Utc::now().timestamp() - 3600,
        },
        TEST_SECRET,
    )
    .unwrap()
}
