//! BlobStore - Media Object Storage
//!
//! Accepts a local file plus metadata and returns the stored-object
//! descriptor the cloud notifier references.

mod http;

pub use http::HttpBlobStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Why an object is stored; selects the key prefix on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPurpose {
    EventImage,
    EventVideo,
}

impl UploadPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventImage => "event_image",
            Self::EventVideo => "event_video",
        }
    }
}

/// Upload request
#[derive(Debug, Clone, Copy)]
pub struct BlobUpload<'a> {
    pub camera_id: i64,
    pub local_path: &'a Path,
    pub height: u32,
    pub width: u32,
    /// `jpeg`, `png`, `mp4`
    pub format: &'a str,
    pub purpose: UploadPurpose,
}

/// Stored object descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, request: BlobUpload<'_>) -> Result<StoredObject>;
}
