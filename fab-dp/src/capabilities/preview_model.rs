//! 3D preview capability client
//!
//! The remote reconstruction service works in two phases: a fast rotating
//! preview video, then the full model assets. A synchronous call returns the
//! preview reference and whatever model refs are already available; the rest
//! arrive later through the push completion endpoint on our side.

use super::{CapabilityError, PreviewModel, PreviewResult};
use async_trait::async_trait;
use fab_common::config::CapabilityConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct PreviewRequest<'a> {
    image_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct PreviewResponse {
    video_url: String,
    #[serde(default)]
    glb_urls: Vec<String>,
}

/// HTTP client for the 3D preview capability
pub struct HttpPreviewModel {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPreviewModel {
    /// Create a client from capability configuration
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be built (should not happen with
    /// valid config).
    pub fn new(config: &CapabilityConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.preview_url.clone(),
            api_key: config.resolve_api_key(),
        }
    }
}

#[async_trait]
impl PreviewModel for HttpPreviewModel {
    async fn preview(&self, image_ref: &str) -> Result<PreviewResult, CapabilityError> {
        tracing::debug!(url = %self.base_url, image_ref, "Requesting 3D preview");

        let mut request = self
            .client
            .post(&self.base_url)
            .json(&PreviewRequest { image_ref });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(CapabilityError::from_reqwest)?;

        let status = response.status();
        if status.is_client_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Rejected(message));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let body: PreviewResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        tracing::info!(
            image_ref,
            model_refs = body.glb_urls.len(),
            "3D preview ready"
        );

        Ok(PreviewResult {
            preview_video_ref: body.video_url,
            model_refs: body.glb_urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_url() {
        let config = CapabilityConfig {
            preview_url: "http://localhost:9001/preview".to_string(),
            ..Default::default()
        };
        let client = HttpPreviewModel::new(&config);
        assert_eq!(client.base_url, "http://localhost:9001/preview");
    }

    #[test]
    fn response_tolerates_missing_model_refs() {
        // First-phase responses carry only the preview video
        let body: PreviewResponse =
            serde_json::from_str(r#"{"video_url": "vid://spin"}"#).unwrap();
        assert_eq!(body.video_url, "vid://spin");
        assert!(body.glb_urls.is_empty());
    }
}
