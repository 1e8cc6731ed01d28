//! Image generation capability client
//!
//! Drives the hosted text-to-image service used for prompt-based design
//! creation and edit forks. The vendor enforces a per-client request rate,
//! so calls pass through a token-bucket limiter before hitting the wire.

use super::{CapabilityError, ImageGeneration};
use async_trait::async_trait;
use fab_common::config::CapabilityConfig;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    style_hints: &'a [String],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image_ref: String,
}

/// HTTP client for the image generation capability
pub struct HttpImageGeneration {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    /// Vendor policy: at most 1 generation request per second per client
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl HttpImageGeneration {
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
            base_url: config.image_generation_url.clone(),
            api_key: config.resolve_api_key(),
            rate_limiter,
        }
    }
}

#[async_trait]
impl ImageGeneration for HttpImageGeneration {
    async fn generate(
        &self,
        prompt: &str,
        style_hints: &[String],
    ) -> Result<String, CapabilityError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %self.base_url, prompt_len = prompt.len(), "Requesting image generation");

        let mut request = self.client.post(&self.base_url).json(&GenerateRequest {
            prompt,
            style_hints,
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

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        tracing::info!(image_ref = %body.image_ref, "Image generated");

        Ok(body.image_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_url() {
        let config = CapabilityConfig {
            image_generation_url: "http://localhost:9001/generate".to_string(),
            api_key: Some("test-key".to_string()),
            ..Default::default()
        };
        let client = HttpImageGeneration::new(&config);
        assert_eq!(client.base_url, "http://localhost:9001/generate");
        assert_eq!(client.api_key.as_deref(), Some("test-key"));
    }

    #[tokio::test]
    async fn rate_limiter_admits_first_request_immediately() {
        let client = HttpImageGeneration::new(&CapabilityConfig::default());

        let start = std::time::Instant::now();
        client.rate_limiter.until_ready().await;
        assert!(start.elapsed().as_millis() < 100);
    }
}
