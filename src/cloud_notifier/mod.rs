//! CloudNotifier - Cloud Event Registration
//!
//! ## Responsibilities
//!
//! - Register event metadata and obtain the remote event id
//! - Attach media (image/video) to a registered event
//! - Report that a video for a registered event will not arrive

mod client;

pub use client::HttpCloudNotifier;

use crate::blob_store::StoredObject;
use crate::camera_directory::EventType;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event metadata sent to the cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRegistration {
    pub camera_id: i64,
    /// Representative still, if one was uploaded
    pub image: Option<StoredObject>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_time: DateTime<Utc>,
    pub event_type: EventType,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Media attached to a registered event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub object: StoredObject,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CloudNotifier: Send + Sync {
    /// Returns the remote event id
    async fn register_event(&self, registration: &EventRegistration) -> Result<String>;

    async fn attach_media(&self, remote_id: &str, media: &MediaAttachment) -> Result<()>;

    async fn notify_video_upload_failed(&self, remote_id: &str) -> Result<()>;
}
