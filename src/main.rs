use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use allday_scribe::audio::spawn_frame_pump;
use allday_scribe::engine::{NatsFallbackTranscriber, NatsPrimaryRecognizer};
use allday_scribe::persist::{FileSnapshotStore, RecoveryCoordinator, SnapshotStore};
use allday_scribe::{
    create_router, AppState, AudioCapture, Config, DayService, LifecycleMonitor, NatsClient,
    RingBuffer,
};

#[derive(Parser, Debug)]
#[command(name = "allday-scribe")]
#[command(about = "All-day transcription service with hybrid engine failover")]
struct Args {
    /// Path to the configuration file (without extension)
    #[arg(short, long, default_value = "config/allday-scribe")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    info!("{} starting", cfg.service.name);

    let nats = Arc::new(NatsClient::connect(&cfg.nats.url, cfg.nats.channel.clone()).await?);

    // Audio capture ring buffer fed by the host's frame stream
    let buffer = Arc::new(RingBuffer::new(
        cfg.audio.sample_rate,
        cfg.audio.channels,
        Duration::from_secs(cfg.audio.buffer_capacity_secs),
    ));
    let _pump = spawn_frame_pump(Arc::clone(&nats), Arc::clone(&buffer)).await?;

    let primary = Arc::new(NatsPrimaryRecognizer::new(Arc::clone(&nats)));
    let fallback = Arc::new(NatsFallbackTranscriber::new(Arc::clone(&nats)));
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(&cfg.snapshots.dir)?);
    let capture: Arc<dyn AudioCapture> = buffer;

    let service = Arc::new(DayService::new(
        cfg.session_config(),
        cfg.failover_config(),
        primary,
        fallback,
        capture,
        Arc::clone(&store),
    ));

    // Surface any unfinished day session from a previous run; the decision
    // to resume or discard it comes over HTTP.
    let recovery = Arc::new(RecoveryCoordinator::new(store));
    match recovery.check().await {
        Ok(Some(summary)) => {
            info!(
                day_id = %summary.day_id,
                segments = summary.segment_count,
                "found a recoverable day session, awaiting recovery decision"
            );
        }
        Ok(None) => info!("no unfinished day session found"),
        Err(e) => warn!("Recovery check failed: {:#}", e),
    }

    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(16);
    let monitor = LifecycleMonitor::new(Arc::clone(&service));
    tokio::spawn(monitor.run(lifecycle_rx));

    let state = AppState::new(service, recovery, lifecycle_tx);
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    info!("HTTP server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
