//! CameraDirectory Repository
//!
//! Database access layer for the camera directory

use super::types::CameraRow;
use crate::error::Result;
use sqlx::MySqlPool;

/// Camera repository for database reads
#[derive(Clone)]
pub struct CameraRepository {
    pool: MySqlPool,
}

impl CameraRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    const CAMERA_COLUMNS: &'static str = r#"
        camera_id, name, vendor, channel, upload_video, playback_url,
        min_confidence, entitled_events
    "#;

    /// Get all enabled cameras
    pub async fn get_enabled_cameras(&self) -> Result<Vec<CameraRow>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE enabled = TRUE AND deleted_at IS NULL ORDER BY camera_id",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, CameraRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }
}
