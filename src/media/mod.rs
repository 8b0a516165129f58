//! Media - Image Probing and External Video Tools
//!
//! ## Responsibilities
//!
//! - Decode/validate still images and read their dimensions
//! - `VideoEncoder`: concat-script → video file (ffmpeg)
//! - `VideoRecorder`: device-side clip export for a time window (ffmpeg)

mod ffmpeg;

pub use ffmpeg::{FfmpegEncoder, FfmpegRecorder};

use crate::camera_directory::CameraRef;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Media tool errors
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} exited with {code:?}: {stderr}")]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("image decode failed: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MediaError> for crate::Error {
    fn from(e: MediaError) -> Self {
        crate::Error::Media(e.to_string())
    }
}

/// Decoded still image facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// File extension / format token (`jpeg`, `png`, ...)
    pub format: &'static str,
}

impl ImageInfo {
    /// Fully decode `data` and report its format and dimensions
    pub fn probe(data: &[u8]) -> Result<Self, MediaError> {
        let format = image::guess_format(data).map_err(|e| MediaError::Decode(e.to_string()))?;
        let token = match format {
            image::ImageFormat::Jpeg => "jpeg",
            image::ImageFormat::Png => "png",
            image::ImageFormat::WebP => "webp",
            image::ImageFormat::Bmp => "bmp",
            image::ImageFormat::Gif => "gif",
            other => {
                return Err(MediaError::Decode(format!("unsupported format {:?}", other)));
            }
        };

        let decoded = image::load_from_memory_with_format(data, format)
            .map_err(|e| MediaError::Decode(e.to_string()))?;

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            format: token,
        })
    }
}

/// Video file on local disk: a device export or a synthesized episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Encodes a concat-demuxer script into one video file
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn run(&self, script_path: &Path, output_path: &Path) -> Result<(), MediaError>;
}

/// Exports the span `[start, end]` from the camera's own storage
#[async_trait]
pub trait VideoRecorder: Send + Sync {
    async fn record(
        &self,
        camera: &CameraRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output_name: &str,
    ) -> Result<RecordedClip, MediaError>;
}
