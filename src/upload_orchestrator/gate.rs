//! Entitlement and per-camera rate limiting

use super::types::DeliveryError;
use crate::camera_directory::{CameraRef, EventType};
use chrono::{DateTime, Duration, Utc};

/// Admission check shared by direct deliveries and motion-start frames
#[derive(Debug, Clone, Copy)]
pub struct EventGate {
    min_interval: Duration,
}

impl EventGate {
    pub fn new(min_interval_secs: i64) -> Self {
        Self {
            min_interval: Duration::seconds(min_interval_secs),
        }
    }

    /// Admit an event and advance the camera's last-event time.
    ///
    /// Rejected events leave the last-event time untouched.
    pub fn admit(
        &self,
        camera: &CameraRef,
        event_type: EventType,
        event_time: DateTime<Utc>,
    ) -> Result<(), DeliveryError> {
        if !camera.is_entitled(event_type) {
            tracing::debug!(
                camera_id = camera.id,
                event_type = %event_type,
                "Event type not entitled, dropped"
            );
            return Err(DeliveryError::NotEntitled(event_type));
        }

        if let Some(last) = camera.last_event_detect_time() {
            let elapsed = event_time - last;
            if elapsed < self.min_interval {
                tracing::debug!(
                    camera_id = camera.id,
                    elapsed_secs = elapsed.num_seconds(),
                    min_interval_secs = self.min_interval.num_seconds(),
                    "Event rate limited"
                );
                return Err(DeliveryError::RateLimited {
                    elapsed_secs: elapsed.num_seconds(),
                });
            }
        }

        camera.set_last_event_detect_time(event_time);
        Ok(())
    }
}
