use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use slink_api::TracingJobQueue;
use slink_db::{Database, Store};
use slink_gateway::SessionRegistry;
use slink_server::config::Config;

/// How long shutdown waits for live sessions to close.
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slink=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.is_development() {
        warn!("Running in development mode");
    }

    let db = Database::open(&config.db_path)?.with_watch_deadline(config.watch_deadline);
    let store: Arc<dyn Store> = Arc::new(db);

    let state = slink_server::build_state(&config, store, Arc::new(TracingJobQueue))?;
    let registry = state.gateway.registry().clone();
    let app = slink_server::app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Slink server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await?;

    Ok(())
}

async fn shutdown_signal(registry: SessionRegistry) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }

    // Upgraded connections are not tracked by the HTTP server; close them here.
    registry.shutdown();
    if !registry.drain(SESSION_DRAIN_TIMEOUT).await {
        warn!("{} live session(s) still open at shutdown", registry.len());
    }
}
