//! UploadOrchestrator - Event Delivery Pipeline
//!
//! ## Responsibilities
//!
//! - Admission: entitlement check and per-camera rate limiting
//! - Local persistence (picture + event record)
//! - Cloud registration (still upload, then metadata) with bounded retry
//! - Optional video leg (record or take a synthesized clip, upload, attach)
//! - Reconciliation of the local record with the remote outcome
//! - Background confirmation of video failures
//!
//! ## Stage order
//!
//! `Start → Persisted → ImageUploaded → Registered → VideoRecorded →
//! VideoUploaded → Done`, skipping stages disabled by [`PipelineFlags`].
//! A failure in one leg never aborts an independent leg.

mod confirmation;
mod gate;
mod retry;
mod types;


pub use confirmation::{spawn_video_failure_confirmation, ConfirmationPolicy, ConfirmationResult};
pub use gate::EventGate;
pub use retry::RetryPolicy;
pub use types::*;

use crate::blob_store::{BlobStore, BlobUpload, StoredObject, UploadPurpose};
use crate::camera_directory::CameraRef;
use crate::cloud_notifier::{CloudNotifier, EventRegistration, MediaAttachment, MediaKind};
use crate::error::Result;
use crate::local_ledger::{LocalLedger, NewEvent, PictureBlob, VideoOutcome};
use crate::media::{ImageInfo, VideoRecorder};
use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn LocalLedger>,
    pub blob_store: Arc<dyn BlobStore>,
    pub notifier: Arc<dyn CloudNotifier>,
    pub recorder: Arc<dyn VideoRecorder>,
}

/// UploadOrchestrator instance
pub struct UploadOrchestrator {
    ledger: Arc<dyn LocalLedger>,
    blob_store: Arc<dyn BlobStore>,
    notifier: Arc<dyn CloudNotifier>,
    recorder: Arc<dyn VideoRecorder>,
    config: PipelineConfig,
    gate: EventGate,
    retry: RetryPolicy,
    confirmation: ConfirmationPolicy,
    /// Temp files for still uploads
    work_dir: PathBuf,
    shutdown: CancellationToken,
}

impl UploadOrchestrator {
    pub async fn new(
        collaborators: Collaborators,
        config: PipelineConfig,
        work_dir: PathBuf,
    ) -> Result<Self> {
        fs::create_dir_all(&work_dir).await?;

        Ok(Self {
            ledger: collaborators.ledger,
            blob_store: collaborators.blob_store,
            notifier: collaborators.notifier,
            recorder: collaborators.recorder,
            gate: EventGate::new(config.min_event_interval_secs),
            config,
            retry: RetryPolicy::default(),
            confirmation: ConfirmationPolicy::default(),
            work_dir,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn gate(&self) -> &EventGate {
        &self.gate
    }

    /// Effective flags for one camera
    pub fn flags_for(&self, camera: &CameraRef) -> PipelineFlags {
        PipelineFlags {
            save_locally: self.config.save_locally,
            upload_to_cloud: self.config.upload_to_cloud,
            upload_video: self.config.upload_video && camera.upload_video_enabled,
        }
    }

    /// Stop every background confirmation loop. Runs already in flight
    /// complete normally.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Gate, then deliver
    ///
    /// `Err` only for gate rejections (`NotEntitled` / `RateLimited`); leg
    /// failures are reported inside the [`DeliveryReport`].
    pub async fn deliver(
        &self,
        request: DeliveryRequest,
    ) -> std::result::Result<DeliveryReport, DeliveryError> {
        self.gate
            .admit(&request.camera, request.event_type, request.event_time)?;
        Ok(self.deliver_admitted(request).await)
    }

    /// Deliver an event that already passed the gate
    pub async fn deliver_admitted(&self, request: DeliveryRequest) -> DeliveryReport {
        let camera = request.camera.clone();
        let flags = self.flags_for(&camera);
        let window = request.window(&self.config);
        let mut report = DeliveryReport::default();
        report.reached.push(PipelineStage::Start);

        let still = self.probe_still(&request);

        // Local persistence
        if flags.save_locally {
            self.persist_into(&request, still, window, &mut report).await;
        }

        // Cloud registration
        if flags.upload_to_cloud {
            let registration = self.register(&request, still, window, &mut report).await;
            report.registration = registration;
            if let Some(e) = &report.registration.error {
                report.errors.push(e.clone());
            }
        }

        // Video leg
        if flags.video_required() && report.registration.is_registered() {
            let remote_id = report.registration.remote_id.clone();
            let video = self
                .video_leg(&request, &remote_id, window, &mut report)
                .await;
            if let Some(e) = &video.error {
                report.errors.push(e.clone());
            }
            report.video = Some(video);
        }

        // Nothing landed anywhere: keep a local trace of the event
        if flags.upload_to_cloud && !report.registration.is_registered() && report.event_id.is_none() {
            tracing::warn!(
                camera_id = camera.id,
                event_type = %request.event_type,
                "Cloud delivery failed without a local record, persisting"
            );
            self.persist_into(&request, still, window, &mut report).await;
        }

        if let Some(event_id) = report.event_id {
            self.reconcile(event_id, flags, &mut report).await;
        }

        if flags.video_required() && report.registration.is_registered() && !report.video_succeeded() {
            report.confirmation = Some(spawn_video_failure_confirmation(
                self.notifier.clone(),
                report.registration.remote_id.clone(),
                self.confirmation,
                self.shutdown.child_token(),
            ));
        }

        report.reached.push(PipelineStage::Done);

        tracing::info!(
            camera_id = camera.id,
            event_type = %request.event_type,
            event_time = %request.event_time,
            event_id = ?report.event_id,
            remote_id = %report.registration.remote_id,
            errors = report.errors.len(),
            "Event delivered"
        );

        report
    }

    fn probe_still(&self, request: &DeliveryRequest) -> Option<ImageInfo> {
        let bytes = request.image.as_deref()?;
        match ImageInfo::probe(bytes) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(
                    camera_id = request.camera.id,
                    error = %e,
                    "Representative image unreadable, delivering without it"
                );
                None
            }
        }
    }

    // ========================================
    // Persistence
    // ========================================

    async fn persist_into(
        &self,
        request: &DeliveryRequest,
        still: Option<ImageInfo>,
        window: ClipWindow,
        report: &mut DeliveryReport,
    ) {
        match self.persist(request, still, window).await {
            Ok(event_id) => {
                report.event_id = Some(event_id);
                report.reached.push(PipelineStage::Persisted);
            }
            Err(e) => {
                tracing::error!(
                    camera_id = request.camera.id,
                    error = %e,
                    "Failed to persist event"
                );
                report.errors.push(DeliveryError::PersistenceFailed(e.to_string()));
            }
        }
    }

    async fn persist(
        &self,
        request: &DeliveryRequest,
        still: Option<ImageInfo>,
        window: ClipWindow,
    ) -> Result<i64> {
        let mut picture_id = None;
        let mut content_hash = None;

        if let (Some(bytes), Some(info)) = (&request.image, still) {
            let blob = PictureBlob {
                camera_id: request.camera.id,
                captured_at: request.event_time,
                format: info.format.to_string(),
                data: bytes.clone(),
            };
            picture_id = Some(self.ledger.save_picture(&blob).await?);
            content_hash = Some(format!("{:x}", Sha1::digest(bytes)));
        }

        let record = NewEvent {
            camera_id: request.camera.id,
            event_type: request.event_type,
            event_time: request.event_time,
            start: window.start,
            end: window.end,
            picture_id,
            content_hash,
            meta: request.meta.clone(),
        };
        match self.ledger.create_event(&record).await {
            Ok(event_id) => Ok(event_id),
            Err(e) => {
                // no event points at the picture
                if let Some(picture_id) = picture_id {
                    if let Err(discard) = self.ledger.discard_picture(picture_id).await {
                        tracing::warn!(
                            picture_id = picture_id,
                            error = %discard,
                            "Failed to discard orphaned picture"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    // ========================================
    // Cloud registration
    // ========================================

    async fn register(
        &self,
        request: &DeliveryRequest,
        still: Option<ImageInfo>,
        window: ClipWindow,
        report: &mut DeliveryReport,
    ) -> UploadOutcome {
        let mut outcome = UploadOutcome::default();

        if let (Some(bytes), Some(info)) = (&request.image, still) {
            match self.upload_still(request.camera.id, bytes, info).await {
                Ok(object) => {
                    outcome.stored_object = Some(object);
                    report.reached.push(PipelineStage::ImageUploaded);
                }
                Err(e) => {
                    outcome.error = Some(DeliveryError::RegistrationFailed(format!(
                        "image upload: {}",
                        e
                    )));
                    return outcome;
                }
            }
        }

        let registration = EventRegistration {
            camera_id: request.camera.id,
            image: outcome.stored_object.clone(),
            start: window.start,
            end: window.end,
            event_time: request.event_time,
            event_type: request.event_type,
            meta: request.meta.clone(),
        };

        let notifier = &self.notifier;
        let registration = &registration;
        match self
            .retry
            .run("register_event", move |_| notifier.register_event(registration))
            .await
        {
            Ok(remote_id) if !remote_id.is_empty() => {
                outcome.remote_id = remote_id;
                report.reached.push(PipelineStage::Registered);
            }
            Ok(_) => {
                outcome.error = Some(DeliveryError::RegistrationFailed(
                    "empty remote event id".to_string(),
                ));
            }
            Err(e) => {
                outcome.error = Some(DeliveryError::RegistrationFailed(e.to_string()));
            }
        }

        outcome
    }

    async fn upload_still(&self, camera_id: i64, bytes: &[u8], info: ImageInfo) -> Result<StoredObject> {
        let temp = self.work_dir.join(format!(
            "still_{}.{}",
            uuid::Uuid::new_v4().simple(),
            info.format
        ));
        fs::write(&temp, bytes).await?;

        let upload = BlobUpload {
            camera_id,
            local_path: &temp,
            height: info.height,
            width: info.width,
            format: info.format,
            purpose: UploadPurpose::EventImage,
        };
        let store = &self.blob_store;
        let result = self
            .retry
            .run("upload_event_image", move |_| store.upload(upload))
            .await;

        remove_quietly(&temp).await;
        result
    }

    // ========================================
    // Video leg
    // ========================================

    async fn video_leg(
        &self,
        request: &DeliveryRequest,
        remote_id: &str,
        window: ClipWindow,
        report: &mut DeliveryReport,
    ) -> UploadOutcome {
        let mut outcome = UploadOutcome {
            remote_id: remote_id.to_string(),
            ..Default::default()
        };

        let (path, width, height, recorded) = match &request.video {
            VideoSource::Record => {
                self.wait_until(window.end).await;
                let name = format!(
                    "event_{}_{}.mp4",
                    request.camera.id,
                    request.event_time.timestamp()
                );
                match self
                    .recorder
                    .record(&request.camera, window.start, window.end, &name)
                    .await
                {
                    Ok(clip) => (clip.path, clip.width, clip.height, true),
                    Err(e) => {
                        outcome.error = Some(DeliveryError::VideoRecordFailed(e.to_string()));
                        return outcome;
                    }
                }
            }
            VideoSource::Clip { clip, .. } => (clip.path.clone(), clip.width, clip.height, false),
            VideoSource::Unavailable { reason } => {
                outcome.error = Some(DeliveryError::VideoRecordFailed(reason.clone()));
                return outcome;
            }
        };
        report.reached.push(PipelineStage::VideoRecorded);

        let upload = BlobUpload {
            camera_id: request.camera.id,
            local_path: &path,
            height,
            width,
            format: "mp4",
            purpose: UploadPurpose::EventVideo,
        };
        let store = &self.blob_store;
        let uploaded = self
            .retry
            .run("upload_event_video", move |_| store.upload(upload))
            .await;

        if recorded {
            remove_quietly(&path).await;
        }

        let object = match uploaded {
            Ok(object) => object,
            Err(e) => {
                outcome.error = Some(DeliveryError::VideoUploadFailed(e.to_string()));
                return outcome;
            }
        };
        outcome.stored_object = Some(object.clone());

        let attachment = MediaAttachment {
            kind: MediaKind::Video,
            object,
            start: Some(window.start),
            end: Some(window.end),
        };
        let notifier = &self.notifier;
        let attachment = &attachment;
        match self
            .retry
            .run("attach_video", move |_| notifier.attach_media(remote_id, attachment))
            .await
        {
            Ok(()) => report.reached.push(PipelineStage::VideoUploaded),
            Err(e) => {
                outcome.error = Some(DeliveryError::VideoUploadFailed(format!("attach: {}", e)));
            }
        }

        outcome
    }

    /// Sleep until `deadline` has passed
    async fn wait_until(&self, deadline: DateTime<Utc>) {
        if let Ok(wait) = (deadline - Utc::now()).to_std() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "Waiting for clip window to close");
            tokio::time::sleep(wait).await;
        }
    }

    // ========================================
    // Reconciliation
    // ========================================

    async fn reconcile(&self, event_id: i64, flags: PipelineFlags, report: &mut DeliveryReport) {
        let outcome = if !report.registration.is_registered() {
            if !flags.upload_to_cloud {
                return;
            }
            VideoOutcome::Failed { artifact: None }
        } else {
            if let Err(e) = self
                .ledger
                .attach_remote_id(event_id, &report.registration.remote_id)
                .await
            {
                tracing::error!(event_id = event_id, error = %e, "Failed to attach remote id");
                report.errors.push(DeliveryError::PersistenceFailed(e.to_string()));
            }

            match &report.video {
                _ if !flags.video_required() => VideoOutcome::NotRequired,
                Some(video) if video.error.is_none() => VideoOutcome::Succeeded {
                    path: video
                        .stored_object
                        .as_ref()
                        .map(|o| o.key.clone())
                        .unwrap_or_default(),
                },
                Some(video) => VideoOutcome::Failed {
                    artifact: video
                        .stored_object
                        .as_ref()
                        .and_then(|o| serde_json::to_string(o).ok()),
                },
                None => VideoOutcome::Failed { artifact: None },
            }
        };

        if let Err(e) = self.ledger.attach_video_outcome(event_id, &outcome).await {
            tracing::error!(event_id = event_id, error = %e, "Failed to record video outcome");
            report.errors.push(DeliveryError::PersistenceFailed(e.to_string()));
        }
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}
