use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use camsentry_capture::fleet::Fleet;
use camsentry_core::config::Config;
use camsentry_core::logring::LogRing;
use camsentry_server::routes::build_router;
use camsentry_server::state::AppState;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const LOG_RING_CAPACITY: usize = 2000;
const REENCODER_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::var("CAMSENTRY_CONFIG").unwrap_or_else(|_| "camsentry.toml".to_string());
    info!(config_path = %config_path, "loading configuration");
    let config = Config::load(std::path::Path::new(&config_path)).context("failed to load configuration")?;
    let config = Arc::new(config);

    let encoder_exe: std::path::PathBuf =
        std::env::var("CAMSENTRY_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string()).into();
    let probe_exe: std::path::PathBuf =
        std::env::var("CAMSENTRY_FFPROBE").unwrap_or_else(|_| "ffprobe".to_string()).into();

    let fleet = Arc::new(Fleet::new(config.clone(), encoder_exe.clone()));
    let log_ring = Arc::new(LogRing::new(LOG_RING_CAPACITY));

    camsentry_health::spawn(config.clone(), fleet.clone(), log_ring.clone());
    let reencoder = camsentry_reencoder::spawn(config.clone(), encoder_exe.clone(), probe_exe).await;

    for source in config.enabled_sources() {
        if let Err(e) = fleet.start(&source.id).await {
            warn!(source_id = %source.id, error = %e, "failed to auto-start source at boot");
        }
    }

    let state = AppState {
        config: config.clone(),
        fleet: fleet.clone(),
        reencoder: reencoder.clone(),
        log_ring,
        encoder_exe,
        sys: Arc::new(Mutex::new(sysinfo::System::new_all())),
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "camsentry control surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(reencoder, fleet))
        .await
        .context("server error")?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then runs the shutdown cascade: cancel the
/// re-encoder (let an in-flight file finish verification only if it's within
/// its grace window, otherwise it aborts on its own cancellation check),
/// stop every supervisor with a graceful deadline, then let axum finish
/// draining in-flight HTTP requests before the process exits.
async fn shutdown_signal(reencoder: camsentry_reencoder::ReencoderHandle, fleet: Arc<Fleet>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    reencoder.request_shutdown();
    tokio::time::sleep(REENCODER_SHUTDOWN_GRACE).await;

    fleet.shutdown().await;
    info!("shutdown cascade complete");
}
