//! End-to-end: ingest → normalizer → frame buffer → synthesizer → orchestrator

use async_trait::async_trait;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use motion_gateway::blob_store::{BlobStore, BlobUpload, StoredObject, UploadPurpose};
use motion_gateway::camera_directory::{CameraDirectory, CameraRef, EventType, VendorRef};
use motion_gateway::clip_synthesizer::{ClipSynthesizer, SynthesizerConfig};
use motion_gateway::cloud_notifier::{CloudNotifier, EventRegistration, MediaAttachment};
use motion_gateway::event_normalizer::{DropReason, EventNormalizer, Handled, VendorEvent};
use motion_gateway::frame_buffer::FrameBuffer;
use motion_gateway::local_ledger::{LocalLedger, NewEvent, PictureBlob, VideoOutcome};
use motion_gateway::media::{MediaError, RecordedClip, VideoEncoder, VideoRecorder};
use motion_gateway::models::{IngestKind, IngestRequest};
use motion_gateway::state::{AppConfig, AppState};
use motion_gateway::upload_orchestrator::{
    Collaborators, DeliveryError, PipelineConfig, UploadOrchestrator,
};
use motion_gateway::{web_api, Error, Result};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const T0: i64 = 1_681_803_300;

// ============================================================
// Fakes
// ============================================================

#[derive(Default)]
struct MemoryLedger {
    events: Mutex<Vec<NewEvent>>,
    outcomes: Mutex<Vec<(i64, VideoOutcome)>>,
}

#[async_trait]
impl LocalLedger for MemoryLedger {
    async fn save_picture(&self, _blob: &PictureBlob) -> Result<i64> {
        Ok(1)
    }

    async fn discard_picture(&self, _picture_id: i64) -> Result<()> {
        Ok(())
    }

    async fn create_event(&self, record: &NewEvent) -> Result<i64> {
        let mut events = self.events.lock().unwrap();
        events.push(record.clone());
        Ok(events.len() as i64)
    }

    async fn attach_remote_id(&self, _event_id: i64, _remote_id: &str) -> Result<()> {
        Ok(())
    }

    async fn attach_video_outcome(&self, event_id: i64, outcome: &VideoOutcome) -> Result<()> {
        self.outcomes.lock().unwrap().push((event_id, outcome.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct MemoryBlobStore {
    uploads: Mutex<Vec<(UploadPurpose, PathBuf)>>,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, request: BlobUpload<'_>) -> Result<StoredObject> {
        assert!(request.local_path.exists());
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((request.purpose, request.local_path.to_path_buf()));
        Ok(StoredObject {
            bucket: "events".to_string(),
            key: format!("{}/{}/{}", request.camera_id, request.purpose.as_str(), uploads.len()),
            size: 1,
            width: request.width,
            height: request.height,
            format: request.format.to_string(),
        })
    }
}

#[derive(Default)]
struct MemoryNotifier {
    registrations: Mutex<Vec<EventRegistration>>,
    attachments: AtomicU32,
    video_failures: AtomicU32,
}

#[async_trait]
impl CloudNotifier for MemoryNotifier {
    async fn register_event(&self, registration: &EventRegistration) -> Result<String> {
        let mut registrations = self.registrations.lock().unwrap();
        registrations.push(registration.clone());
        Ok(format!("remote-{}", registrations.len()))
    }

    async fn attach_media(&self, _remote_id: &str, _media: &MediaAttachment) -> Result<()> {
        self.attachments.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_video_upload_failed(&self, _remote_id: &str) -> Result<()> {
        self.video_failures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct StubEncoder {
    calls: AtomicU32,
    fail: AtomicBool,
}

#[async_trait]
impl VideoEncoder for StubEncoder {
    async fn run(&self, _script: &Path, output: &Path) -> std::result::Result<(), MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::Failed {
                program: "ffmpeg".to_string(),
                code: Some(1),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }
        std::fs::write(output, b"mp4")?;
        Ok(())
    }
}

struct StubRecorder {
    dir: PathBuf,
    calls: AtomicU32,
}

#[async_trait]
impl VideoRecorder for StubRecorder {
    async fn record(
        &self,
        _camera: &CameraRef,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        output_name: &str,
    ) -> std::result::Result<RecordedClip, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = self.dir.join(output_name);
        std::fs::write(&path, b"mp4")?;
        Ok(RecordedClip {
            path,
            width: 1280,
            height: 720,
        })
    }
}

// ============================================================
// Fixture
// ============================================================

struct Gateway {
    _dir: tempfile::TempDir,
    episodes_dir: PathBuf,
    ledger: Arc<MemoryLedger>,
    store: Arc<MemoryBlobStore>,
    notifier: Arc<MemoryNotifier>,
    encoder: Arc<StubEncoder>,
    recorder: Arc<StubRecorder>,
    directory: Arc<CameraDirectory>,
    frame_buffer: Arc<FrameBuffer>,
    normalizer: Arc<EventNormalizer>,
}

impl Gateway {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let recordings = dir.path().join("recordings");
        std::fs::create_dir_all(&recordings).unwrap();
        let episodes_dir = dir.path().join("episodes");

        let ledger = Arc::new(MemoryLedger::default());
        let store = Arc::new(MemoryBlobStore::default());
        let notifier = Arc::new(MemoryNotifier::default());
        let encoder = Arc::new(StubEncoder::default());
        let recorder = Arc::new(StubRecorder {
            dir: recordings,
            calls: AtomicU32::new(0),
        });

        let directory = Arc::new(CameraDirectory::from_cameras([
            CameraRef::new(9, "gate", VendorRef::new("hik", "9"))
                .with_entitlements([EventType::Motion, EventType::Human, EventType::Alarm])
                .with_video_upload(true)
                .with_min_confidence(0.5),
        ]));

        let config = PipelineConfig {
            save_locally: true,
            upload_to_cloud: true,
            upload_video: true,
            ..Default::default()
        };
        let orchestrator = Arc::new(
            UploadOrchestrator::new(
                Collaborators {
                    ledger: ledger.clone(),
                    blob_store: store.clone(),
                    notifier: notifier.clone(),
                    recorder: recorder.clone(),
                },
                config,
                dir.path().join("stills"),
            )
            .await
            .unwrap(),
        );
        let synthesizer = Arc::new(
            ClipSynthesizer::new(
                encoder.clone(),
                SynthesizerConfig {
                    work_dir: episodes_dir.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap(),
        );
        let frame_buffer = Arc::new(FrameBuffer::new());
        let normalizer = Arc::new(EventNormalizer::new(
            directory.clone(),
            frame_buffer.clone(),
            synthesizer,
            orchestrator,
        ));

        Self {
            _dir: dir,
            episodes_dir,
            ledger,
            store,
            notifier,
            encoder,
            recorder,
            directory,
            frame_buffer,
            normalizer,
        }
    }

    async fn camera(&self) -> Arc<CameraRef> {
        self.directory.resolve(&VendorRef::new("hik", "9")).await.unwrap()
    }

    async fn push(&self, event: VendorEvent) -> Handled {
        self.normalizer.handle(self.camera().await, event).await
    }

    fn state(&self) -> AppState {
        AppState {
            config: AppConfig::default(),
            directory: self.directory.clone(),
            frame_buffer: self.frame_buffer.clone(),
            normalizer: self.normalizer.clone(),
            started_at: std::time::Instant::now(),
        }
    }

    fn episode_files(&self) -> usize {
        std::fs::read_dir(&self.episodes_dir).unwrap().count()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 12, image::Rgb([120, 120, 120]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn frame(secs: i64) -> VendorEvent {
    VendorEvent::MotionFrame {
        timestamp: at(secs),
        image: jpeg(),
    }
}

fn delivered(handled: Handled) -> Box<motion_gateway::upload_orchestrator::DeliveryReport> {
    match handled {
        Handled::Delivered(report) | Handled::EpisodeDelivered { report, .. } => report,
        other => panic!("expected delivery, got {:?}", other),
    }
}

// ============================================================
// Motion episodes
// ============================================================

#[tokio::test]
async fn test_motion_episode_delivered_once_with_merged_window() {
    let gw = Gateway::start().await;

    // arrival order differs from event order
    assert!(matches!(gw.push(frame(T0 + 30)).await, Handled::Buffered { frames: 1 }));
    assert!(matches!(gw.push(frame(T0 + 10)).await, Handled::Buffered { frames: 2 }));
    assert!(matches!(gw.push(frame(T0 + 20)).await, Handled::Buffered { frames: 3 }));

    let (report, representative) = match gw.push(VendorEvent::MotionEnd { timestamp: at(T0 + 31) }).await {
        Handled::EpisodeDelivered { report, representative } => (report, representative),
        other => panic!("expected episode delivery, got {:?}", other),
    };

    assert_eq!(report.remote_id(), Some("remote-1"));
    assert_eq!(representative.event_time, at(T0 + 10));
    assert_eq!(representative.remote_event_id(), Some("remote-1"));
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.video_succeeded());
    assert!(gw.frame_buffer.is_group_empty(9).await);

    let registrations = gw.notifier.registrations.lock().unwrap().clone();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].event_type, EventType::Motion);
    assert_eq!(registrations[0].start, at(T0 + 10));
    assert_eq!(registrations[0].end, at(T0 + 30));
    assert_eq!(registrations[0].event_time, at(T0 + 10));

    // synthesized clip was used, not a device recording, and then removed
    assert_eq!(gw.encoder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gw.recorder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(gw.notifier.attachments.load(Ordering::SeqCst), 1);
    assert_eq!(gw.episode_files(), 0);

    let outcomes = gw.ledger.outcomes.lock().unwrap().clone();
    assert!(matches!(outcomes[..], [(1, VideoOutcome::Succeeded { .. })]));
}

#[tokio::test]
async fn test_only_motion_start_is_rate_limited() {
    let gw = Gateway::start().await;

    // continuation frames inside the interval are kept
    gw.push(frame(T0)).await;
    assert!(matches!(gw.push(frame(T0 + 2)).await, Handled::Buffered { frames: 2 }));
    delivered(gw.push(VendorEvent::MotionEnd { timestamp: at(T0 + 3) }).await);

    // a new start 5s after the previous start is suppressed
    match gw.push(frame(T0 + 5)).await {
        Handled::Dropped(DropReason::Gate(DeliveryError::RateLimited { .. })) => {}
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert!(gw.frame_buffer.is_group_empty(9).await);

    assert!(matches!(gw.push(frame(T0 + 10)).await, Handled::Buffered { frames: 1 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_start_frames_join_one_episode() {
    for round in 0..50 {
        let gw = Arc::new(Gateway::start().await);
        let camera = gw.camera().await;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let pushes: Vec<_> = (0..2)
            .map(|i| {
                let (gw, camera, barrier) = (gw.clone(), camera.clone(), barrier.clone());
                tokio::spawn(async move {
                    barrier.wait().await;
                    gw.normalizer.handle(camera, frame(T0 + i)).await
                })
            })
            .collect();

        let mut lengths = Vec::new();
        for push in pushes {
            match push.await.unwrap() {
                Handled::Buffered { frames } => lengths.push(frames),
                other => panic!("round {}: frame lost: {:?}", round, other),
            }
        }
        lengths.sort();
        assert_eq!(lengths, vec![1, 2], "round {}", round);
        assert_eq!(gw.frame_buffer.drain(9).await.len(), 2);
    }
}

#[tokio::test]
async fn test_episode_without_decodable_frames_is_dropped() {
    let gw = Gateway::start().await;

    gw.push(VendorEvent::MotionFrame {
        timestamp: at(T0),
        image: b"garbage".to_vec(),
    })
    .await;

    match gw.push(VendorEvent::MotionEnd { timestamp: at(T0 + 1) }).await {
        Handled::Dropped(DropReason::NoImages) => {}
        other => panic!("expected NoImages, got {:?}", other),
    }
    assert_eq!(gw.encoder.calls.load(Ordering::SeqCst), 0);
    assert!(gw.notifier.registrations.lock().unwrap().is_empty());
    assert!(gw.ledger.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_end_without_frames_is_dropped() {
    let gw = Gateway::start().await;
    match gw.push(VendorEvent::MotionEnd { timestamp: at(T0) }).await {
        Handled::Dropped(DropReason::EmptyEpisode) => {}
        other => panic!("expected EmptyEpisode, got {:?}", other),
    }
}

#[tokio::test]
async fn test_encoder_failure_still_delivers_the_frame() {
    let gw = Gateway::start().await;
    gw.encoder.fail.store(true, Ordering::SeqCst);

    gw.push(frame(T0)).await;
    gw.push(frame(T0 + 1)).await;
    let mut report = delivered(gw.push(VendorEvent::MotionEnd { timestamp: at(T0 + 2) }).await);

    assert_eq!(report.remote_id(), Some("remote-1"));
    assert!(matches!(report.errors[..], [DeliveryError::VideoRecordFailed(_)]));
    let uploads = gw.store.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, UploadPurpose::EventImage);

    report.confirmation.take().unwrap().await.unwrap();
    assert_eq!(gw.notifier.video_failures.load(Ordering::SeqCst), 1);
    assert_eq!(gw.episode_files(), 0);
}

#[tokio::test]
async fn test_flush_stale_delivers_abandoned_group() {
    let gw = Gateway::start().await;
    gw.push(frame(T0)).await;
    gw.push(frame(T0 + 1)).await;

    assert_eq!(gw.normalizer.flush_stale(Duration::minutes(5)).await, 0);
    assert_eq!(gw.normalizer.flush_stale(Duration::seconds(-1)).await, 1);
    assert!(gw.frame_buffer.is_group_empty(9).await);
    assert_eq!(gw.notifier.registrations.lock().unwrap().len(), 1);
}

// ============================================================
// Direct detections / alarms
// ============================================================

#[tokio::test]
async fn test_detection_confidence_and_entitlement() {
    let gw = Gateway::start().await;

    let low = gw
        .push(VendorEvent::Detection {
            event_type: EventType::Human,
            timestamp: at(T0),
            image: Some(jpeg()),
            confidence: Some(0.2),
            meta: serde_json::Value::Null,
        })
        .await;
    assert!(matches!(low, Handled::Dropped(DropReason::BelowConfidence { .. })));

    let unlicensed = gw
        .push(VendorEvent::Detection {
            event_type: EventType::LicensePlate,
            timestamp: at(T0),
            image: Some(jpeg()),
            confidence: Some(0.9),
            meta: serde_json::Value::Null,
        })
        .await;
    assert!(matches!(
        unlicensed,
        Handled::Dropped(DropReason::Gate(DeliveryError::NotEntitled(EventType::LicensePlate)))
    ));

    let report = delivered(
        gw.push(VendorEvent::Detection {
            event_type: EventType::Human,
            timestamp: at(T0),
            image: Some(jpeg()),
            confidence: Some(0.9),
            meta: serde_json::json!({ "zone": "north" }),
        })
        .await,
    );
    assert!(report.video_succeeded());
    // direct detections export a clip from the device
    assert_eq!(gw.recorder.calls.load(Ordering::SeqCst), 1);
    assert_eq!(gw.ledger.events.lock().unwrap()[0].meta["zone"], "north");
}

#[tokio::test]
async fn test_alarm_rising_edge_delivers_without_image() {
    let gw = Gateway::start().await;
    let alarm = |secs: i64, active: bool| VendorEvent::Alarm {
        event_type: EventType::Alarm,
        timestamp: at(secs),
        active,
        image: None,
        meta: serde_json::Value::Null,
    };

    let report = delivered(gw.push(alarm(T0, true)).await);
    assert_eq!(report.remote_id(), Some("remote-1"));
    assert!(gw.notifier.registrations.lock().unwrap()[0].image.is_none());

    assert!(matches!(gw.push(alarm(T0 + 20, true)).await, Handled::Dropped(DropReason::AlarmNotRising)));
    assert!(matches!(gw.push(alarm(T0 + 40, false)).await, Handled::Dropped(DropReason::AlarmNotRising)));
    delivered(gw.push(alarm(T0 + 60, true)).await);
}

// ============================================================
// HTTP boundary
// ============================================================

#[tokio::test]
async fn test_ingest_rejects_unknown_camera() {
    let gw = Gateway::start().await;
    let req = IngestRequest {
        kind: IngestKind::MotionEnd,
        event_type: None,
        timestamp: T0,
        image: None,
        confidence: None,
        active: None,
        meta: serde_json::Value::Null,
    };

    let result = web_api::ingest_event(
        State(gw.state()),
        UrlPath(("dahua".to_string(), "1".to_string())),
        Json(req),
    )
    .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_ingest_acknowledges_then_buffers() {
    let gw = Gateway::start().await;
    let req = IngestRequest {
        kind: IngestKind::MotionFrame,
        event_type: None,
        timestamp: T0,
        image: Some(base64::engine::general_purpose::STANDARD.encode(jpeg())),
        confidence: None,
        active: None,
        meta: serde_json::Value::Null,
    };

    let (status, Json(ack)) = web_api::ingest_event(
        State(gw.state()),
        UrlPath(("HIK".to_string(), "9".to_string())),
        Json(req),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(ack.ok);

    for _ in 0..100 {
        if !gw.frame_buffer.is_group_empty(9).await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("frame was never buffered");
}
