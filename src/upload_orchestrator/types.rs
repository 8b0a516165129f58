//! UploadOrchestrator Type Definitions

use crate::blob_store::StoredObject;
use crate::camera_directory::{CameraRef, EventType};
use crate::media::RecordedClip;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::confirmation::ConfirmationResult;

// ============================================================
// Configuration
// ============================================================

/// Delivery pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub save_locally: bool,
    pub upload_to_cloud: bool,
    pub upload_video: bool,
    pub min_event_interval_secs: i64,
    pub seconds_before_event: i64,
    pub clip_duration_secs: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            save_locally: true,
            upload_to_cloud: true,
            upload_video: false,
            min_event_interval_secs: 10,
            seconds_before_event: 5,
            clip_duration_secs: 15,
        }
    }
}

impl PipelineConfig {
    /// Read `SAVE_LOCALLY`, `UPLOAD_TO_CLOUD`, `UPLOAD_VIDEO`,
    /// `MIN_EVENT_INTERVAL_SECS`, `SECONDS_BEFORE_EVENT`, `CLIP_DURATION_SECS`
    pub fn from_env() -> Self {
        fn flag(key: &str, default: bool) -> bool {
            std::env::var(key)
                .ok()
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        }
        fn number(key: &str, default: i64) -> i64 {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            save_locally: flag("SAVE_LOCALLY", defaults.save_locally),
            upload_to_cloud: flag("UPLOAD_TO_CLOUD", defaults.upload_to_cloud),
            upload_video: flag("UPLOAD_VIDEO", defaults.upload_video),
            min_event_interval_secs: number("MIN_EVENT_INTERVAL_SECS", defaults.min_event_interval_secs),
            seconds_before_event: number("SECONDS_BEFORE_EVENT", defaults.seconds_before_event),
            clip_duration_secs: number("CLIP_DURATION_SECS", defaults.clip_duration_secs),
        }
    }
}

// ============================================================
// Pipeline Stages
// ============================================================

/// Effective per-event flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineFlags {
    pub save_locally: bool,
    pub upload_to_cloud: bool,
    pub upload_video: bool,
}

impl PipelineFlags {
    /// All 8 flag combinations
    pub fn all() -> Vec<Self> {
        (0u8..8)
            .map(|bits| Self {
                save_locally: bits & 0b001 != 0,
                upload_to_cloud: bits & 0b010 != 0,
                upload_video: bits & 0b100 != 0,
            })
            .collect()
    }

    /// The video leg needs a registered event
    pub fn video_required(&self) -> bool {
        self.upload_to_cloud && self.upload_video
    }

    /// Ordered stages a fully successful run passes through
    pub fn plan(&self) -> Vec<PipelineStage> {
        let mut stages = vec![PipelineStage::Start];
        let mut current = PipelineStage::Start;
        while let Some(next) = current.successor(self) {
            stages.push(next);
            current = next;
        }
        stages
    }
}

/// Delivery pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    Persisted,
    ImageUploaded,
    Registered,
    VideoRecorded,
    VideoUploaded,
    Done,
}

impl PipelineStage {
    /// Next stage for the given flags; `None` after `Done`
    pub fn successor(self, flags: &PipelineFlags) -> Option<Self> {
        use PipelineStage::*;
        match self {
            Start if flags.save_locally => Some(Persisted),
            Start | Persisted if flags.upload_to_cloud => Some(ImageUploaded),
            Start | Persisted => Some(Done),
            ImageUploaded => Some(Registered),
            Registered if flags.upload_video => Some(VideoRecorded),
            Registered => Some(Done),
            VideoRecorded => Some(VideoUploaded),
            VideoUploaded => Some(Done),
            Done => None,
        }
    }
}

// ============================================================
// Errors / Outcomes
// ============================================================

/// Delivery error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Event type not licensed for this camera (silent no-op)
    #[error("event type {0} not entitled")]
    NotEntitled(EventType),

    /// Inside the per-camera minimum interval (silent no-op)
    #[error("rate limited: {elapsed_secs}s since last event")]
    RateLimited { elapsed_secs: i64 },

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    #[error("video record failed: {0}")]
    VideoRecordFailed(String),

    #[error("video upload failed: {0}")]
    VideoUploadFailed(String),
}

impl DeliveryError {
    /// Gate rejections are indistinguishable from success for the caller
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::NotEntitled(_) | Self::RateLimited { .. })
    }
}

/// Result of one delivery leg
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub stored_object: Option<StoredObject>,
    /// Empty = not registered
    pub remote_id: String,
    pub error: Option<DeliveryError>,
}

impl UploadOutcome {
    pub fn is_registered(&self) -> bool {
        !self.remote_id.is_empty()
    }
}

// ============================================================
// Request
// ============================================================

/// Time span a clip covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ClipWindow {
    /// `[event_time - before, start + duration]`
    pub fn around(event_time: DateTime<Utc>, seconds_before: i64, duration_secs: i64) -> Self {
        let start = event_time - Duration::seconds(seconds_before);
        Self {
            start,
            end: start + Duration::seconds(duration_secs),
        }
    }
}

/// Where the event's video comes from
#[derive(Debug, Clone)]
pub enum VideoSource {
    /// Export the computed window from the device
    Record,
    /// Already-synthesized clip covering `window`; owned by the caller
    Clip { clip: RecordedClip, window: ClipWindow },
    /// Video production failed upstream
    Unavailable { reason: String },
}

/// One canonical event to deliver
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub camera: Arc<CameraRef>,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    /// Representative still
    pub image: Option<Vec<u8>>,
    pub meta: serde_json::Value,
    pub video: VideoSource,
}

impl DeliveryRequest {
    pub fn new(camera: Arc<CameraRef>, event_type: EventType, event_time: DateTime<Utc>) -> Self {
        Self {
            camera,
            event_type,
            event_time,
            image: None,
            meta: serde_json::Value::Null,
            video: VideoSource::Record,
        }
    }

    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_video(mut self, video: VideoSource) -> Self {
        self.video = video;
        self
    }

    /// Clip window: the episode's own span, or one computed around the event
    pub fn window(&self, config: &PipelineConfig) -> ClipWindow {
        match &self.video {
            VideoSource::Clip { window, .. } => *window,
            _ => ClipWindow::around(
                self.event_time,
                config.seconds_before_event,
                config.clip_duration_secs,
            ),
        }
    }
}

// ============================================================
// Report
// ============================================================

/// What one delivery run achieved
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub event_id: Option<i64>,
    pub registration: UploadOutcome,
    pub video: Option<UploadOutcome>,
    pub reached: Vec<PipelineStage>,
    pub errors: Vec<DeliveryError>,
    /// Background "video upload failed" notice, if one was started
    pub confirmation: Option<JoinHandle<ConfirmationResult>>,
}

impl DeliveryReport {
    pub fn remote_id(&self) -> Option<&str> {
        self.registration
            .is_registered()
            .then_some(self.registration.remote_id.as_str())
    }

    pub fn video_succeeded(&self) -> bool {
        self.video.as_ref().map(|v| v.error.is_none()).unwrap_or(false)
    }
}
