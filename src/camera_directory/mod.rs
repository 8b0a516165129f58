//! CameraDirectory - Known Cameras by Vendor Reference
//!
//! ## Responsibilities
//!
//! - Resolve a vendor/channel identifier to a known camera
//! - Hold capability snapshots (entitlements, video upload, thresholds)
//! - Keep per-camera last-event-detect bookkeeping across reloads

mod repository;
mod types;

pub use repository::CameraRepository;
pub use types::*;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// CameraDirectory instance
pub struct CameraDirectory {
    cameras: RwLock<HashMap<VendorRef, Arc<CameraRef>>>,
    repository: Option<CameraRepository>,
}

impl CameraDirectory {
    /// Create directory backed by the `cameras` table and load it
    pub async fn new(repository: CameraRepository) -> Result<Self> {
        let directory = Self {
            cameras: RwLock::new(HashMap::new()),
            repository: Some(repository),
        };
        directory.reload().await?;
        Ok(directory)
    }

    /// Create directory from a fixed camera list (no database)
    pub fn from_cameras(cameras: impl IntoIterator<Item = CameraRef>) -> Self {
        let map = cameras
            .into_iter()
            .map(|c| (c.vendor_ref.clone(), Arc::new(c)))
            .collect();

        Self {
            cameras: RwLock::new(map),
            repository: None,
        }
    }

    /// Resolve vendor reference to a camera
    pub async fn resolve(&self, vendor_ref: &VendorRef) -> Result<Arc<CameraRef>> {
        self.cameras
            .read()
            .await
            .get(vendor_ref)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("camera {}", vendor_ref)))
    }

    /// Look up by internal camera id
    pub async fn get(&self, camera_id: i64) -> Option<Arc<CameraRef>> {
        self.cameras
            .read()
            .await
            .values()
            .find(|c| c.id == camera_id)
            .cloned()
    }

    /// Add or replace a camera
    pub async fn insert(&self, camera: CameraRef) -> Arc<CameraRef> {
        let camera = Arc::new(camera);
        self.cameras
            .write()
            .await
            .insert(camera.vendor_ref.clone(), camera.clone());
        camera
    }

    /// Reload from the database, carrying over last-event-detect times
    pub async fn reload(&self) -> Result<usize> {
        let Some(repository) = &self.repository else {
            return Ok(self.len().await);
        };

        let rows = repository.get_enabled_cameras().await?;
        let count = self.replace_all(rows.into_iter().map(CameraRef::from)).await;

        tracing::info!(count = count, "CameraDirectory reloaded");

        Ok(count)
    }

    /// Swap in a fresh camera set. A camera that was already known keeps
    /// sharing its last-event-detect cell with the old snapshot, so callers
    /// still holding the old `Arc` rate-limit against the same clock.
    async fn replace_all(&self, cameras: impl IntoIterator<Item = CameraRef>) -> usize {
        let mut current = self.cameras.write().await;
        let mut fresh = HashMap::with_capacity(current.len());
        for mut camera in cameras {
            if let Some(prev) = current.get(&camera.vendor_ref) {
                camera.share_last_event_detect(prev);
            }
            fresh.insert(camera.vendor_ref.clone(), Arc::new(camera));
        }
        *current = fresh;
        current.len()
    }

    /// Number of known cameras
    pub async fn len(&self) -> usize {
        self.cameras.read().await.len()
    }
}
