//! EventNormalizer - Vendor Payload Entry Point
//!
//! ## Responsibilities
//!
//! - Confidence threshold, entitlement and rate-limit checks before any work
//! - Self-contained detections and alarm rising edges go straight to the
//!   UploadOrchestrator
//! - Fragmented motion: start/continue frames into the FrameBuffer, end
//!   signal drains, merges, synthesizes and delivers once
//!
//! Callers always get an acknowledgment; the returned [`Handled`] is for
//! logging and tests only.

use crate::camera_directory::{CameraDirectory, CameraRef, EventType, VendorRef};
use crate::clip_synthesizer::{ClipSynthesizer, SynthesisError};
use crate::error::Result;
use crate::frame_buffer::{FrameBuffer, MergedEpisode, MotionFrame};
use crate::upload_orchestrator::{
    ClipWindow, DeliveryError, DeliveryReport, DeliveryRequest, UploadOrchestrator, VideoSource,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Decoded vendor payload in canonical form
#[derive(Debug, Clone)]
pub enum VendorEvent {
    /// Self-contained detection (object/face/plate/...)
    Detection {
        event_type: EventType,
        timestamp: DateTime<Utc>,
        image: Option<Vec<u8>>,
        confidence: Option<f32>,
        meta: serde_json::Value,
    },
    /// Binary alarm input toggle
    Alarm {
        event_type: EventType,
        timestamp: DateTime<Utc>,
        active: bool,
        image: Option<Vec<u8>>,
        meta: serde_json::Value,
    },
    /// One still of a motion burst
    MotionFrame {
        timestamp: DateTime<Utc>,
        image: Vec<u8>,
    },
    /// Motion stopped
    MotionEnd { timestamp: DateTime<Utc> },
}

impl VendorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Detection { timestamp, .. }
            | Self::Alarm { timestamp, .. }
            | Self::MotionFrame { timestamp, .. }
            | Self::MotionEnd { timestamp } => *timestamp,
        }
    }
}

/// Why nothing was delivered
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    BelowConfidence { confidence: f32, threshold: f32 },
    Gate(DeliveryError),
    /// Alarm falling edge, or repeated active state
    AlarmNotRising,
    /// End signal without buffered frames
    EmptyEpisode,
    /// No frame of the episode decoded
    NoImages,
}

/// What the normalizer did with one payload
#[derive(Debug)]
pub enum Handled {
    Delivered(Box<DeliveryReport>),
    /// Merged motion episode; the representative frame carries the remote id
    EpisodeDelivered {
        report: Box<DeliveryReport>,
        representative: Box<MotionFrame>,
    },
    Buffered { frames: usize },
    Dropped(DropReason),
}

/// Last seen alarm state per camera and alarm type
#[derive(Debug, Default)]
struct AlarmEdges {
    active: HashMap<(i64, EventType), bool>,
}

impl AlarmEdges {
    /// Record a toggle; true only on an inactive → active transition
    fn observe(&mut self, camera_id: i64, event_type: EventType, active: bool) -> bool {
        let previous = self.active.insert((camera_id, event_type), active);
        active && previous != Some(true)
    }
}

/// EventNormalizer instance
pub struct EventNormalizer {
    directory: Arc<CameraDirectory>,
    frame_buffer: Arc<FrameBuffer>,
    synthesizer: Arc<ClipSynthesizer>,
    orchestrator: Arc<UploadOrchestrator>,
    alarms: Mutex<AlarmEdges>,
}

impl EventNormalizer {
    pub fn new(
        directory: Arc<CameraDirectory>,
        frame_buffer: Arc<FrameBuffer>,
        synthesizer: Arc<ClipSynthesizer>,
        orchestrator: Arc<UploadOrchestrator>,
    ) -> Self {
        Self {
            directory,
            frame_buffer,
            synthesizer,
            orchestrator,
            alarms: Mutex::new(AlarmEdges::default()),
        }
    }

    /// Resolve the pushing device
    pub async fn resolve(&self, vendor_ref: &VendorRef) -> Result<Arc<CameraRef>> {
        self.directory.resolve(vendor_ref).await
    }

    /// Handle one payload for an already resolved camera
    pub async fn handle(&self, camera: Arc<CameraRef>, event: VendorEvent) -> Handled {
        match event {
            VendorEvent::Detection {
                event_type,
                timestamp,
                image,
                confidence,
                meta,
            } => {
                if let Some(confidence) = confidence {
                    if confidence < camera.min_confidence {
                        tracing::debug!(
                            camera_id = camera.id,
                            confidence = confidence,
                            threshold = camera.min_confidence,
                            "Detection below confidence threshold"
                        );
                        return Handled::Dropped(DropReason::BelowConfidence {
                            confidence,
                            threshold: camera.min_confidence,
                        });
                    }
                }
                let mut request = DeliveryRequest::new(camera, event_type, timestamp).with_meta(meta);
                request.image = image;
                self.deliver(request).await
            }

            VendorEvent::Alarm {
                event_type,
                timestamp,
                active,
                image,
                meta,
            } => {
                let rising = self.alarms.lock().await.observe(camera.id, event_type, active);
                if !rising {
                    tracing::debug!(
                        camera_id = camera.id,
                        event_type = %event_type,
                        active = active,
                        "Alarm toggle without rising edge"
                    );
                    return Handled::Dropped(DropReason::AlarmNotRising);
                }
                let mut request = DeliveryRequest::new(camera, event_type, timestamp).with_meta(meta);
                request.image = image;
                self.deliver(request).await
            }

            VendorEvent::MotionFrame { timestamp, image } => {
                self.push_motion_frame(&camera, timestamp, image).await
            }

            VendorEvent::MotionEnd { timestamp } => {
                let frames = self.frame_buffer.drain(camera.id).await;
                tracing::debug!(
                    camera_id = camera.id,
                    frames = frames.len(),
                    end_signal = %timestamp,
                    "Motion ended"
                );
                match MergedEpisode::merge(frames) {
                    Some(episode) => self.deliver_episode(camera, episode).await,
                    None => Handled::Dropped(DropReason::EmptyEpisode),
                }
            }
        }
    }

    async fn deliver(&self, request: DeliveryRequest) -> Handled {
        match self.orchestrator.deliver(request).await {
            Ok(report) => Handled::Delivered(Box::new(report)),
            Err(e) => Handled::Dropped(DropReason::Gate(e)),
        }
    }

    async fn push_motion_frame(
        &self,
        camera: &CameraRef,
        timestamp: DateTime<Utc>,
        image: Vec<u8>,
    ) -> Handled {
        // only a motion start passes the gate; continuation frames belong to
        // an already admitted episode
        let gate = self.orchestrator.gate();
        let pushed = self
            .frame_buffer
            .push_or_open(MotionFrame::new(camera.id, timestamp, image), || {
                gate.admit(camera, EventType::Motion, timestamp)
            })
            .await;

        match pushed {
            Ok(frames) => {
                if frames == 1 {
                    tracing::debug!(camera_id = camera.id, start = %timestamp, "Motion started");
                }
                Handled::Buffered { frames }
            }
            Err(e) => Handled::Dropped(DropReason::Gate(e)),
        }
    }

    /// Synthesize and deliver a closed episode once
    async fn deliver_episode(&self, camera: Arc<CameraRef>, mut episode: MergedEpisode) -> Handled {
        let window = ClipWindow {
            start: episode.start,
            end: episode.end,
        };

        let video = match self.synthesizer.synthesize(episode.frames()).await {
            Ok(clip) => {
                episode = episode.with_video(clip.path.clone());
                VideoSource::Clip { clip, window }
            }
            Err(SynthesisError::NoImages) => {
                tracing::warn!(
                    camera_id = camera.id,
                    frames = episode.frames().len(),
                    "Motion episode has no decodable frames, dropped"
                );
                return Handled::Dropped(DropReason::NoImages);
            }
            Err(e) => VideoSource::Unavailable {
                reason: e.to_string(),
            },
        };

        let meta = json!({
            "source": "motion_episode",
            "frames": episode.frames().len(),
            "episode_start": episode.start,
            "episode_end": episode.end,
        });
        let request = DeliveryRequest::new(camera, EventType::Motion, episode.start)
            .with_image(episode.representative().image.clone())
            .with_meta(meta)
            .with_video(video);

        // admitted at motion start
        let report = self.orchestrator.deliver_admitted(request).await;

        if let Some(path) = episode.video_path() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove episode clip");
            }
        }

        let frames = episode.frames().len();
        let representative = episode.into_representative(report.remote_id());
        tracing::info!(
            camera_id = representative.camera_id,
            frames = frames,
            representative_time = %representative.event_time,
            remote_event_id = ?representative.remote_event_id(),
            "Motion episode delivered"
        );

        Handled::EpisodeDelivered {
            report: Box::new(report),
            representative: Box::new(representative),
        }
    }

    /// Close groups whose end signal never arrived
    pub async fn flush_stale(&self, max_age: Duration) -> usize {
        let stale = self.frame_buffer.drain_stale(max_age).await;
        let mut delivered = 0;

        for (camera_id, frames) in stale {
            let Some(camera) = self.directory.get(camera_id).await else {
                tracing::warn!(camera_id = camera_id, frames = frames.len(), "Stale group for unknown camera");
                continue;
            };
            tracing::info!(camera_id = camera_id, frames = frames.len(), "Flushing stale motion group");
            if let Some(episode) = MergedEpisode::merge(frames) {
                if let Handled::EpisodeDelivered { .. } = self.deliver_episode(camera, episode).await {
                    delivered += 1;
                }
            }
        }

        delivered
    }
}
