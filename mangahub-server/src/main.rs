//! mangahub-server binary entry point.
//!
//! ```bash
//! TCP_PORT=9090 UDP_PORT=9091 DB_PATH=./data/mangahub.db mangahub-server
//! ```

use anyhow::Context;
use mangahub_server::auth::{JwtHs256, TokenVerifier};
use mangahub_server::bridge::{Bridge, SessionLookup};
use mangahub_server::config::{Config, LogFormat};
use mangahub_server::http::{self, HttpState};
use mangahub_server::liveness::HeartbeatMonitor;
use mangahub_server::metrics::ServerMetrics;
use mangahub_server::registry::SessionRegistry;
use mangahub_server::storage::{ProgressStore, SqliteStore};
use mangahub_server::tcp::{SessionContext, SessionServer};
use mangahub_server::udp::{spawn_subscriber_sweeper, DatagramServer};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tcp_port = config.tcp_port,
        udp_port = config.udp_port,
        http_port = config.http_port,
        db_path = %config.db_path.display(),
        "starting mangahub sync core"
    );
    if config.using_dev_secret() {
        tracing::warn!("JWT_SECRET is unset, using the development fallback");
    }

    let store = SqliteStore::new(&config.db_path)
        .await
        .context("failed to open database")?;

    let metrics = Arc::new(ServerMetrics::default());
    let registry = Arc::new(SessionRegistry::default());
    let monitor = Arc::new(HeartbeatMonitor::default());
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtHs256::new(&config.jwt_secret));

    let bridge = Arc::new(Bridge::new(Arc::clone(&metrics)));
    let bridge_task = bridge.start();
    bridge.set_session_registry(Arc::clone(&registry) as Arc<dyn SessionLookup>);

    let ctx = Arc::new(SessionContext {
        store: Arc::new(store) as Arc<dyn ProgressStore>,
        registry: Arc::clone(&registry),
        monitor: Arc::clone(&monitor),
        bridge: Arc::clone(&bridge),
        verifier: Arc::clone(&verifier),
        metrics: Arc::clone(&metrics),
    });

    let tcp = Arc::new(
        SessionServer::bind(("0.0.0.0", config.tcp_port), Arc::clone(&ctx))
            .await
            .context("failed to bind session server")?,
    );
    let tcp_task = tcp.start();
    let liveness_task = tcp.spawn_liveness_sweeper(config.liveness.clone());

    let udp = Arc::new(
        DatagramServer::bind(
            ("0.0.0.0", config.udp_port),
            Arc::clone(&verifier),
            Arc::clone(&metrics),
        )
        .await
        .context("failed to bind notification server")?,
    );
    let udp_task = udp.start();
    let ttl_task = spawn_subscriber_sweeper(udp.registry(), config.datagram.clone());
    bridge.set_datagram_broadcaster(Arc::new(udp.broadcaster()));

    let http_state = Arc::new(HttpState::new(
        Arc::clone(&metrics),
        Arc::clone(&registry),
        udp.registry(),
    ));
    let http_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .context("failed to bind HTTP listener")?;
    let http_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(http_listener, http::build_router(http_state)).await {
            tracing::error!(error = %err, "HTTP server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    tcp.stop().await;
    udp.stop();
    bridge.stop();
    for task in [tcp_task, udp_task, liveness_task, ttl_task, http_task, bridge_task] {
        task.abort();
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .init(),
    }
}
