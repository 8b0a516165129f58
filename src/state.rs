//! Application state
//!
//! Holds all shared components and configuration

use crate::camera_directory::CameraDirectory;
use crate::event_normalizer::EventNormalizer;
use crate::frame_buffer::FrameBuffer;
use crate::upload_orchestrator::PipelineConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database URL
    pub database_url: String,
    /// Server port
    pub port: u16,
    /// Server host
    pub host: String,
    /// Object storage endpoint
    pub blob_store_url: String,
    /// Object storage bucket
    pub blob_bucket: String,
    /// Cloud event API endpoint
    pub cloud_api_url: String,
    /// Bearer token for blob store and cloud API
    pub cloud_api_token: Option<String>,
    /// Local picture files
    pub picture_dir: PathBuf,
    /// Scratch space for synthesis, still uploads and recorded clips
    pub work_dir: PathBuf,
    pub ffmpeg_path: String,
    /// Motion groups without an end signal are flushed after this long
    pub stale_group_secs: i64,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "mysql://root@localhost/motion_gateway".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            blob_store_url: std::env::var("BLOB_STORE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            blob_bucket: std::env::var("BLOB_BUCKET").unwrap_or_else(|_| "events".to_string()),
            cloud_api_url: std::env::var("CLOUD_API_URL")
                .unwrap_or_else(|_| "http://localhost:8090/api".to_string()),
            cloud_api_token: std::env::var("CLOUD_API_TOKEN").ok(),
            picture_dir: std::env::var("PICTURE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/motion-gateway/pictures")),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/var/lib/motion-gateway/work")),
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            stale_group_secs: std::env::var("STALE_GROUP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            pipeline: PipelineConfig::from_env(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// CameraDirectory (vendor ref -> camera)
    pub directory: Arc<CameraDirectory>,
    /// FrameBuffer (live motion groups)
    pub frame_buffer: Arc<FrameBuffer>,
    /// EventNormalizer (ingest entry point)
    pub normalizer: Arc<EventNormalizer>,
    pub started_at: Instant,
}
