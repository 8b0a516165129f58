//! CameraDirectory Type Definitions

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// ============================================================
// Event Type
// ============================================================

/// Canonical event type after vendor payload classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Motion,
    Human,
    Vehicle,
    Face,
    LicensePlate,
    Intrusion,
    LineCrossing,
    Alarm,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Motion => "motion",
            Self::Human => "human",
            Self::Vehicle => "vehicle",
            Self::Face => "face",
            Self::LicensePlate => "license_plate",
            Self::Intrusion => "intrusion",
            Self::LineCrossing => "line_crossing",
            Self::Alarm => "alarm",
        }
    }

    /// Parse a vendor-side label. Unknown labels are `None` and get dropped
    /// by the normalizer.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "motion" | "vmd" | "motion_detection" => Some(Self::Motion),
            "human" | "person" | "people" | "pedestrian" => Some(Self::Human),
            "vehicle" | "car" | "motor_vehicle" => Some(Self::Vehicle),
            "face" | "face_detection" => Some(Self::Face),
            "license_plate" | "plate" | "lpr" | "anpr" => Some(Self::LicensePlate),
            "intrusion" | "region_entrance" | "field_detection" => Some(Self::Intrusion),
            "line_crossing" | "tripwire" | "linedetection" => Some(Self::LineCrossing),
            "alarm" | "io" | "alarm_input" => Some(Self::Alarm),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// Vendor Reference
// ============================================================

/// Vendor + channel identifier a device pushes with
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VendorRef {
    pub vendor: String,
    pub channel: String,
}

impl VendorRef {
    pub fn new(vendor: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into().to_lowercase(),
            channel: channel.into(),
        }
    }
}

impl std::fmt::Display for VendorRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.vendor, self.channel)
    }
}

// ============================================================
// Camera Reference
// ============================================================

/// Identity + capability snapshot of a known camera
///
/// Shared as `Arc<CameraRef>`; the only mutable field is the
/// last-event-detect time, which concurrent events update last-write-wins.
/// Snapshots of the same camera taken across reloads share that cell.
#[derive(Debug)]
pub struct CameraRef {
    pub id: i64,
    pub name: String,
    pub vendor_ref: VendorRef,
    /// Record/upload a clip for each registered event
    pub upload_video_enabled: bool,
    /// Playback URL template used for device-side export
    /// (`{start}` / `{end}` placeholders, see `media::FfmpegRecorder`)
    pub playback_url: Option<String>,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    entitlements: HashSet<EventType>,
    /// Unix seconds, 0 = never
    last_event_detect: Arc<AtomicI64>,
}

impl CameraRef {
    pub fn new(id: i64, name: impl Into<String>, vendor_ref: VendorRef) -> Self {
        Self {
            id,
            name: name.into(),
            vendor_ref,
            upload_video_enabled: false,
            playback_url: None,
            min_confidence: 0.0,
            entitlements: HashSet::new(),
            last_event_detect: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_entitlements(mut self, events: impl IntoIterator<Item = EventType>) -> Self {
        self.entitlements = events.into_iter().collect();
        self
    }

    pub fn with_video_upload(mut self, enabled: bool) -> Self {
        self.upload_video_enabled = enabled;
        self
    }

    pub fn with_playback_url(mut self, url: impl Into<String>) -> Self {
        self.playback_url = Some(url.into());
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Whether the camera's license permits reporting this event type
    pub fn is_entitled(&self, event_type: EventType) -> bool {
        self.entitlements.contains(&event_type)
    }

    pub fn entitlements(&self) -> impl Iterator<Item = &EventType> {
        self.entitlements.iter()
    }

    /// Last accepted event time, `None` if the camera never reported
    pub fn last_event_detect_time(&self) -> Option<DateTime<Utc>> {
        match self.last_event_detect.load(Ordering::Acquire) {
            0 => None,
            secs => Utc.timestamp_opt(secs, 0).single(),
        }
    }

    pub fn set_last_event_detect_time(&self, at: DateTime<Utc>) {
        self.last_event_detect.store(at.timestamp(), Ordering::Release);
    }

    /// Take over the last-event cell of an earlier snapshot of this camera
    pub(super) fn share_last_event_detect(&mut self, previous: &CameraRef) {
        self.last_event_detect = previous.last_event_detect.clone();
    }
}

// ============================================================
// Database Row
// ============================================================

/// Row of the `cameras` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CameraRow {
    pub camera_id: i64,
    pub name: String,
    pub vendor: String,
    pub channel: String,
    pub upload_video: bool,
    pub playback_url: Option<String>,
    pub min_confidence: Option<f32>,
    /// Comma-separated event type labels
    pub entitled_events: Option<String>,
}

impl From<CameraRow> for CameraRef {
    fn from(row: CameraRow) -> Self {
        let entitlements: Vec<EventType> = row
            .entitled_events
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(EventType::parse)
            .collect();

        let mut camera = CameraRef::new(row.camera_id, row.name, VendorRef::new(row.vendor, row.channel))
            .with_entitlements(entitlements)
            .with_video_upload(row.upload_video)
            .with_min_confidence(row.min_confidence.unwrap_or(0.0));
        camera.playback_url = row.playback_url;
        camera
    }
}
