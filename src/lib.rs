//! Motion Gateway Library
//!
//! Event core of an edge gateway between third-party cameras/NVRs and a
//! cloud backend.
//!
//! ## Architecture
//!
//! 1. CameraDirectory - Known cameras, entitlements, last-event bookkeeping
//! 2. EventNormalizer - Vendor payload entry point
//! 3. FrameBuffer - Per-camera motion frame aggregation
//! 4. ClipSynthesizer - Still frames to one video clip
//! 5. UploadOrchestrator - Persist, register, upload, reconcile
//! 6. LocalLedger / BlobStore / CloudNotifier - External collaborators
//! 7. WebAPI - Ingest and health endpoints
//!
//! ## Design Principles
//!
//! - Best-effort delivery: devices are always acknowledged
//! - Each delivery leg fails independently
//! - Collaborators sit behind traits so every leg is testable in isolation

pub mod blob_store;
pub mod camera_directory;
pub mod clip_synthesizer;
pub mod cloud_notifier;
pub mod event_normalizer;
pub mod frame_buffer;
pub mod local_ledger;
pub mod media;
pub mod models;
pub mod upload_orchestrator;
pub mod web_api;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
