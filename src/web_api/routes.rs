//! API route definitions

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{TimeZone, Utc};

use crate::camera_directory::{EventType, VendorRef};
use crate::error::{Error, Result};
use crate::event_normalizer::{Handled, VendorEvent};
use crate::models::{ApiResponse, IngestKind, IngestRequest};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Ingest
        .route("/api/events/:vendor/:channel", post(ingest_event))
        .with_state(state)
}

/// Accept one vendor push
///
/// Unknown cameras and malformed payloads are rejected synchronously;
/// everything after that runs on its own task and the device always gets 202.
pub async fn ingest_event(
    State(state): State<AppState>,
    Path((vendor, channel)): Path<(String, String)>,
    Json(req): Json<IngestRequest>,
) -> Result<(StatusCode, Json<ApiResponse<()>>)> {
    let vendor_ref = VendorRef::new(vendor, channel);
    let camera = state.normalizer.resolve(&vendor_ref).await?;
    let event = decode_ingest(req)?;

    let normalizer = state.normalizer.clone();
    tokio::spawn(async move {
        let camera_id = camera.id;
        match normalizer.handle(camera, event).await {
            Handled::Delivered(report) => {
                tracing::debug!(
                    camera_id = camera_id,
                    remote_id = ?report.remote_id(),
                    stages = ?report.reached,
                    "Ingest delivered"
                );
            }
            Handled::EpisodeDelivered { report, representative } => {
                tracing::debug!(
                    camera_id = camera_id,
                    remote_id = ?representative.remote_event_id(),
                    episode_start = %representative.event_time,
                    stages = ?report.reached,
                    "Ingest episode delivered"
                );
            }
            Handled::Buffered { frames } => {
                tracing::trace!(camera_id = camera_id, frames = frames, "Ingest buffered");
            }
            Handled::Dropped(reason) => {
                tracing::debug!(camera_id = camera_id, reason = ?reason, "Ingest dropped");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::ack())))
}

/// Validate an ingest payload into a canonical vendor event
pub fn decode_ingest(req: IngestRequest) -> Result<VendorEvent> {
    let timestamp = Utc
        .timestamp_opt(req.timestamp, 0)
        .single()
        .ok_or_else(|| Error::Validation(format!("invalid timestamp {}", req.timestamp)))?;

    let image = match req.image.as_deref() {
        Some(encoded) => Some(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::Validation(format!("image is not valid base64: {}", e)))?,
        ),
        None => None,
    };

    let event_type = |default: Option<EventType>| -> Result<EventType> {
        match req.event_type.as_deref() {
            Some(label) => EventType::parse(label)
                .ok_or_else(|| Error::Validation(format!("unknown event type '{}'", label))),
            None => default.ok_or_else(|| Error::Validation("event_type is required".to_string())),
        }
    };

    let event = match req.kind {
        IngestKind::Detection => VendorEvent::Detection {
            event_type: event_type(None)?,
            timestamp,
            image,
            confidence: req.confidence,
            meta: req.meta,
        },
        IngestKind::Alarm => VendorEvent::Alarm {
            event_type: event_type(Some(EventType::Alarm))?,
            timestamp,
            active: req.active.unwrap_or(true),
            image,
            meta: req.meta,
        },
        IngestKind::MotionFrame => VendorEvent::MotionFrame {
            timestamp,
            image: image
                .ok_or_else(|| Error::Validation("motion_frame requires an image".to_string()))?,
        },
        IngestKind::MotionEnd => VendorEvent::MotionEnd { timestamp },
    };

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: IngestKind) -> IngestRequest {
        IngestRequest {
            kind,
            event_type: None,
            timestamp: 1_681_803_328,
            image: None,
            confidence: None,
            active: None,
            meta: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_detection_requires_known_type() {
        assert!(matches!(
            decode_ingest(request(IngestKind::Detection)),
            Err(Error::Validation(_))
        ));

        let mut req = request(IngestKind::Detection);
        req.event_type = Some("spaceship".to_string());
        assert!(matches!(decode_ingest(req), Err(Error::Validation(_))));

        let mut req = request(IngestKind::Detection);
        req.event_type = Some("human".to_string());
        req.confidence = Some(0.8);
        match decode_ingest(req).unwrap() {
            VendorEvent::Detection {
                event_type,
                timestamp,
                confidence,
                ..
            } => {
                assert_eq!(event_type, EventType::Human);
                assert_eq!(timestamp.timestamp(), 1_681_803_328);
                assert_eq!(confidence, Some(0.8));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alarm_defaults() {
        match decode_ingest(request(IngestKind::Alarm)).unwrap() {
            VendorEvent::Alarm {
                event_type, active, ..
            } => {
                assert_eq!(event_type, EventType::Alarm);
                assert!(active);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_motion_frame_image_decoding() {
        assert!(matches!(
            decode_ingest(request(IngestKind::MotionFrame)),
            Err(Error::Validation(_))
        ));

        let mut req = request(IngestKind::MotionFrame);
        req.image = Some("%%%".to_string());
        assert!(matches!(decode_ingest(req), Err(Error::Validation(_))));

        let mut req = request(IngestKind::MotionFrame);
        req.image = Some(base64::engine::general_purpose::STANDARD.encode(b"jpegbytes"));
        match decode_ingest(req).unwrap() {
            VendorEvent::MotionFrame { image, .. } => assert_eq!(image, b"jpegbytes"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_timestamp() {
        let mut req = request(IngestKind::MotionEnd);
        req.timestamp = i64::MAX;
        assert!(matches!(decode_ingest(req), Err(Error::Validation(_))));
    }
}
