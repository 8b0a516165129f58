//! HTTP object storage client
//!
//! Objects are written with `PUT {base_url}/{bucket}/{key}`; dimensions and
//! purpose travel as headers so the storage side can index them.

use super::{BlobStore, BlobUpload, StoredObject};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::fs;

/// HttpBlobStore instance
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    bucket: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(base_url: String, bucket: String, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket,
            token,
        })
    }

    fn object_key(request: &BlobUpload<'_>) -> String {
        format!(
            "{}/{}/{}.{}",
            request.camera_id,
            request.purpose.as_str(),
            uuid::Uuid::new_v4(),
            request.format
        )
    }

    fn content_type(format: &str) -> &'static str {
        match format {
            "jpeg" | "jpg" => "image/jpeg",
            "png" => "image/png",
            "mp4" => "video/mp4",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, request: BlobUpload<'_>) -> Result<StoredObject> {
        let data = fs::read(request.local_path).await?;
        let size = data.len() as u64;
        let key = Self::object_key(&request);
        let url = format!("{}/{}/{}", self.base_url, self.bucket, key);

        let mut req = self
            .client
            .put(&url)
            .header("Content-Type", Self::content_type(request.format))
            .header("X-Object-Width", request.width.to_string())
            .header("X-Object-Height", request.height.to_string())
            .header("X-Object-Purpose", request.purpose.as_str())
            .header("X-Camera-Id", request.camera_id.to_string())
            .body(data);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "blob upload HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        tracing::debug!(
            camera_id = request.camera_id,
            bucket = %self.bucket,
            key = %key,
            size = size,
            "Blob uploaded"
        );

        Ok(StoredObject {
            bucket: self.bucket.clone(),
            key,
            size,
            width: request.width,
            height: request.height,
            format: request.format.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::UploadPurpose;
    use std::path::Path;

    #[test]
    fn test_object_key_layout() {
        let request = BlobUpload {
            camera_id: 12,
            local_path: Path::new("/tmp/x.jpeg"),
            height: 720,
            width: 1280,
            format: "jpeg",
            purpose: UploadPurpose::EventImage,
        };
        let key = HttpBlobStore::object_key(&request);
        assert!(key.starts_with("12/event_image/"));
        assert!(key.ends_with(".jpeg"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(HttpBlobStore::content_type("mp4"), "video/mp4");
        assert_eq!(HttpBlobStore::content_type("png"), "image/png");
        assert_eq!(HttpBlobStore::content_type("bin"), "application/octet-stream");
    }
}
