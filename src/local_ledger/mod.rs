//! LocalLedger - Durable Event Records
//!
//! ## Responsibilities
//!
//! - Store picture blobs and event records before any network call
//! - Reconcile records afterwards: remote id, video outcome
//!
//! Records are never deleted from here.

mod repository;

pub use repository::MySqlLedger;

use crate::camera_directory::EventType;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Picture blob to persist
#[derive(Debug, Clone)]
pub struct PictureBlob {
    pub camera_id: i64,
    pub captured_at: DateTime<Utc>,
    pub format: String,
    pub data: Vec<u8>,
}

/// Event record to create
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub camera_id: i64,
    pub event_type: EventType,
    pub event_time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub picture_id: Option<i64>,
    /// SHA-1 hex of the representative image
    pub content_hash: Option<String>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Final video state of a persisted event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoOutcome {
    /// No video was required for this event
    NotRequired,
    Succeeded { path: String },
    /// `artifact` is the serialized partial stored-object info, if any
    Failed { artifact: Option<String> },
}

#[async_trait]
pub trait LocalLedger: Send + Sync {
    async fn save_picture(&self, blob: &PictureBlob) -> Result<i64>;

    /// Remove a picture no event ended up referencing
    async fn discard_picture(&self, picture_id: i64) -> Result<()>;

    async fn create_event(&self, record: &NewEvent) -> Result<i64>;

    async fn attach_remote_id(&self, event_id: i64, remote_id: &str) -> Result<()>;

    async fn attach_video_outcome(&self, event_id: i64, outcome: &VideoOutcome) -> Result<()>;
}
