//! Motion Gateway
//!
//! Main entry point for the gateway application.

use motion_gateway::{
    blob_store::HttpBlobStore,
    camera_directory::{CameraDirectory, CameraRepository},
    clip_synthesizer::{ClipSynthesizer, SynthesizerConfig},
    cloud_notifier::HttpCloudNotifier,
    event_normalizer::EventNormalizer,
    frame_buffer::FrameBuffer,
    local_ledger::MySqlLedger,
    media::{FfmpegEncoder, FfmpegRecorder},
    state::{AppConfig, AppState},
    upload_orchestrator::{Collaborators, UploadOrchestrator},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Encoder timeout for one synthesized clip
const ENCODE_TIMEOUT_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motion_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Motion Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        blob_store_url = %config.blob_store_url,
        cloud_api_url = %config.cloud_api_url,
        picture_dir = %config.picture_dir.display(),
        work_dir = %config.work_dir.display(),
        save_locally = config.pipeline.save_locally,
        upload_to_cloud = config.pipeline.upload_to_cloud,
        upload_video = config.pipeline.upload_video,
        min_event_interval_secs = config.pipeline.min_event_interval_secs,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let directory = Arc::new(CameraDirectory::new(CameraRepository::new(pool.clone())).await?);
    tracing::info!(cameras = directory.len().await, "CameraDirectory initialized");

    let ledger = Arc::new(MySqlLedger::new(pool.clone(), config.picture_dir.clone()).await?);
    let blob_store = Arc::new(HttpBlobStore::new(
        config.blob_store_url.clone(),
        config.blob_bucket.clone(),
        config.cloud_api_token.clone(),
    )?);
    let notifier = Arc::new(HttpCloudNotifier::new(
        config.cloud_api_url.clone(),
        config.cloud_api_token.clone(),
    )?);
    let recorder = Arc::new(
        FfmpegRecorder::new(config.ffmpeg_path.clone(), config.work_dir.join("recordings")).await?,
    );

    let orchestrator = Arc::new(
        UploadOrchestrator::new(
            Collaborators {
                ledger,
                blob_store,
                notifier,
                recorder,
            },
            config.pipeline.clone(),
            config.work_dir.join("stills"),
        )
        .await?,
    );

    let synthesizer = Arc::new(
        ClipSynthesizer::new(
            Arc::new(FfmpegEncoder::new(config.ffmpeg_path.clone(), ENCODE_TIMEOUT_SECS)),
            SynthesizerConfig {
                work_dir: config.work_dir.join("episodes"),
                ..Default::default()
            },
        )
        .await?,
    );

    let frame_buffer = Arc::new(FrameBuffer::new());
    let normalizer = Arc::new(EventNormalizer::new(
        directory.clone(),
        frame_buffer.clone(),
        synthesizer,
        orchestrator.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        directory: directory.clone(),
        frame_buffer,
        normalizer: normalizer.clone(),
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Flush motion groups whose end signal never arrived
    let stale_normalizer = normalizer.clone();
    let stale_age = chrono::Duration::seconds(config.stale_group_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let flushed = stale_normalizer.flush_stale(stale_age).await;
            if flushed > 0 {
                tracing::info!(episodes = flushed, "Stale motion groups flushed");
            }
        }
    });

    // Refresh the camera directory
    let reload_directory = directory.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = reload_directory.reload().await {
                tracing::error!(error = %e, "Failed to reload camera directory");
            }
        }
    });

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let shutdown_orchestrator = orchestrator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            shutdown_orchestrator.shutdown();
        })
        .await?;

    Ok(())
}
