//! LocalLedger Repository
//!
//! MySQL `pictures` / `events` tables; picture bytes live on the filesystem.

use super::{LocalLedger, NewEvent, PictureBlob, VideoOutcome};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use std::path::PathBuf;
use tokio::fs;

/// MySQL-backed ledger
#[derive(Clone)]
pub struct MySqlLedger {
    pool: MySqlPool,
    picture_dir: PathBuf,
}

impl MySqlLedger {
    pub async fn new(pool: MySqlPool, picture_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&picture_dir).await?;
        Ok(Self { pool, picture_dir })
    }

    fn picture_path(&self, blob: &PictureBlob) -> PathBuf {
        self.picture_dir
            .join(blob.camera_id.to_string())
            .join(blob.captured_at.format("%Y%m%d").to_string())
            .join(format!("{}.{}", uuid::Uuid::new_v4(), blob.format))
    }
}

#[async_trait]
impl LocalLedger for MySqlLedger {
    async fn save_picture(&self, blob: &PictureBlob) -> Result<i64> {
        let path = self.picture_path(blob);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &blob.data).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO pictures (camera_id, path, size_bytes, format, captured_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(blob.camera_id)
        .bind(path.to_string_lossy().to_string())
        .bind(blob.data.len() as u64)
        .bind(&blob.format)
        .bind(blob.captured_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_id() as i64),
            Err(e) => {
                // no row points at it
                let _ = fs::remove_file(&path).await;
                Err(e.into())
            }
        }
    }

    async fn discard_picture(&self, picture_id: i64) -> Result<()> {
        let row = sqlx::query("SELECT path FROM pictures WHERE picture_id = ?")
            .bind(picture_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(Error::NotFound(format!("picture {}", picture_id)));
        };
        let path: String = row.try_get("path")?;

        sqlx::query("DELETE FROM pictures WHERE picture_id = ?")
            .bind(picture_id)
            .execute(&self.pool)
            .await?;

        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn create_event(&self, record: &NewEvent) -> Result<i64> {
        let meta = serde_json::to_string(&record.meta)?;
        let done = sqlx::query(
            r#"
            INSERT INTO events (
                camera_id, event_type, event_time, start_time, end_time,
                picture_id, content_hash, meta, remote_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, '', NOW(3))
            "#,
        )
        .bind(record.camera_id)
        .bind(record.event_type.as_str())
        .bind(record.event_time)
        .bind(record.start)
        .bind(record.end)
        .bind(record.picture_id)
        .bind(&record.content_hash)
        .bind(meta)
        .execute(&self.pool)
        .await?;

        Ok(done.last_insert_id() as i64)
    }

    async fn attach_remote_id(&self, event_id: i64, remote_id: &str) -> Result<()> {
        let done = sqlx::query("UPDATE events SET remote_id = ? WHERE event_id = ?")
            .bind(remote_id)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }

    async fn attach_video_outcome(&self, event_id: i64, outcome: &VideoOutcome) -> Result<()> {
        let (failed, path, artifact) = match outcome {
            VideoOutcome::NotRequired => (false, None, None),
            VideoOutcome::Succeeded { path } => (false, Some(path.as_str()), None),
            VideoOutcome::Failed { artifact } => (true, None, artifact.as_deref()),
        };

        let done = sqlx::query(
            "UPDATE events SET video_failed = ?, video_path = ?, video_artifact = ? WHERE event_id = ?",
        )
        .bind(failed)
        .bind(path)
        .bind(artifact)
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }
}
