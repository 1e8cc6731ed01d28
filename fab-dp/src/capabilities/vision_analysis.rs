//! Vision analysis capability client
//!
//! Sends a design image to the hosted vision model and parses the structured
//! analysis (description plus feature keywords) out of the response. Shares
//! the vendor's per-client request rate with the other AI endpoints.

use super::{CapabilityError, VisionAnalysis, VisionResult};
use async_trait::async_trait;
use fab_common::config::CapabilityConfig;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    image_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_hints: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    description: String,
    #[serde(default)]
    features: Vec<String>,
}

/// HTTP client for the vision analysis capability
pub struct HttpVisionAnalysis {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpVisionAnalysis {
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

        let rate_limiter =
            RateLimiter::direct(Quota::per_second(NonZeroU32::new(1).expect("1 is non-zero")));

        Self {
            client,
            base_url: config.vision_url.clone(),
            api_key: config.resolve_api_key(),
            rate_limiter,
        }
    }
}

#[async_trait]
impl VisionAnalysis for HttpVisionAnalysis {
    async fn analyze(
        &self,
        image_ref: &str,
        prompt_hints: Option<&str>,
    ) -> Result<VisionResult, CapabilityError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %self.base_url, image_ref, "Requesting vision analysis");

        let mut request = self.client.post(&self.base_url).json(&AnalyzeRequest {
            image_ref,
            prompt_hints,
        });
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

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        if body.description.is_empty() {
            return Err(CapabilityError::InvalidResponse(
                "analysis response missing description".to_string(),
            ));
        }

        tracing::info!(
            image_ref,
            features = body.features.len(),
            "Vision analysis complete"
        );

        Ok(VisionResult {
            description: body.description,
            features: body.features,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_url() {
        let config = CapabilityConfig {
            vision_url: "http://localhost:9001/vision".to_string(),
            ..Default::default()
        };
        let client = HttpVisionAnalysis::new(&config);
        assert_eq!(client.base_url, "http://localhost:9001/vision");
    }

    #[test]
    fn request_omits_absent_prompt_hints() {
        let request = AnalyzeRequest {
            image_ref: "img://a",
            prompt_hints: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("prompt_hints"));
    }
}
