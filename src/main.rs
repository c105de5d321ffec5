use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use fleetwire::api::{self, AppState};
use fleetwire::auth::{RevokedTokens, SessionManager};
use fleetwire::engine::Engine;
use fleetwire::{observability, reaper};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FLEETWIRE_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    observability::init(metrics_port);

    let port = std::env::var("FLEETWIRE_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("FLEETWIRE_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("FLEETWIRE_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let jwt_secret = std::env::var("FLEETWIRE_JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("FLEETWIRE_JWT_SECRET not set, using a development secret");
        "fleetwire-dev-secret".into()
    });
    let token_ttl_secs: u64 = std::env::var("FLEETWIRE_TOKEN_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3600);
    let compact_threshold: u64 = std::env::var("FLEETWIRE_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let wal_path = PathBuf::from(&data_dir).join("fleetwire.wal");
    let engine = Arc::new(Engine::new(wal_path)?);
    let sessions = Arc::new(SessionManager::new(&jwt_secret, token_ttl_secs));
    let revoked = Arc::new(RevokedTokens::new());

    tokio::spawn(reaper::run_token_sweeper(revoked.clone()));
    tokio::spawn(reaper::run_compactor(engine.clone(), compact_threshold));

    let state = AppState {
        engine,
        sessions,
        revoked,
    };
    let app = api::router(state);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("fleetwire listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  token_ttl: {token_ttl_secs}s");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("fleetwire stopped");
    Ok(())
}

/// Resolve on SIGTERM or ctrl-c; axum then stops accepting and drains
/// in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
