//! Shared models and types for the HTTP boundary

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse<()> {
    /// Bare `{"ok": true}` acknowledgment
    pub fn ack() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub cameras: usize,
    pub live_motion_groups: usize,
}

/// Payload kind pushed by a vendor adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    Detection,
    Alarm,
    MotionFrame,
    MotionEnd,
}

/// Canonical event push: `POST /api/events/:vendor/:channel`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub kind: IngestKind,
    /// Event type label (`human`, `vehicle`, `line_crossing`, ...)
    #[serde(default)]
    pub event_type: Option<String>,
    /// Unix seconds
    pub timestamp: i64,
    /// Base64-encoded still
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Alarm state; ignored for other kinds
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub meta: serde_json::Value,
}
