//! Cloud API HTTP client

use super::{CloudNotifier, EventRegistration, MediaAttachment};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Cloud API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HttpCloudNotifier
#[derive(Clone)]
pub struct HttpCloudNotifier {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpCloudNotifier {
    pub fn new(base_url: String, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            // redirects turn POST into GET
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let req = self.http.post(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<ApiResponse> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let body: ApiResponse = response.json().await?;
        if !body.ok {
            return Err(Error::Api(
                body.error.unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl CloudNotifier for HttpCloudNotifier {
    async fn register_event(&self, registration: &EventRegistration) -> Result<String> {
        let body = self.send(self.post("/events").json(registration)).await?;

        let remote_id = body
            .event_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Api("registration returned no event_id".to_string()))?;

        info!(
            camera_id = registration.camera_id,
            event_type = %registration.event_type,
            remote_id = %remote_id,
            "Event registered"
        );
        Ok(remote_id)
    }

    async fn attach_media(&self, remote_id: &str, media: &MediaAttachment) -> Result<()> {
        self.send(self.post(&format!("/events/{}/media", remote_id)).json(media))
            .await?;
        debug!(remote_id = %remote_id, kind = ?media.kind, key = %media.object.key, "Media attached");
        Ok(())
    }

    async fn notify_video_upload_failed(&self, remote_id: &str) -> Result<()> {
        let result = self
            .send(
                self.post(&format!("/events/{}/video-failed", remote_id))
                    .json(&serde_json::json!({ "reason": "video_upload_failed" })),
            )
            .await;

        if let Err(e) = &result {
            debug!(remote_id = %remote_id, error = %e, "Video failure notice rejected");
        }
        result.map(|_| ())
    }
}
