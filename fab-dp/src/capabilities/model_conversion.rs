//! Model conversion capability client
//!
//! Converts a 3D model reference into manufacturing file bytes (STL/STEP).
//! The response body is the file itself, streamed back verbatim to the
//! download caller.

use super::{CapabilityError, FileFormat, ModelConversion};
use async_trait::async_trait;
use fab_common::config::CapabilityConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    model_ref: &'a str,
    target_format: &'a str,
}

/// HTTP client for the model conversion capability
pub struct HttpModelConversion {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpModelConversion {
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
            base_url: config.conversion_url.clone(),
            api_key: config.resolve_api_key(),
        }
    }
}

#[async_trait]
impl ModelConversion for HttpModelConversion {
    async fn convert(
        &self,
        model_ref: &str,
        target_format: FileFormat,
    ) -> Result<Vec<u8>, CapabilityError> {
        tracing::debug!(
            url = %self.base_url,
            model_ref,
            format = %target_format,
            "Requesting model conversion"
        );

        let mut request = self.client.post(&self.base_url).json(&ConvertRequest {
            model_ref,
            target_format: target_format.as_str(),
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

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::InvalidResponse(e.to_string()))?;

        if bytes.is_empty() {
            return Err(CapabilityError::InvalidResponse(
                "conversion produced an empty file".to_string(),
            ));
        }

        tracing::info!(
            model_ref,
            format = %target_format,
            file_size = bytes.len(),
            "Model conversion complete"
        );

        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_uses_configured_url() {
        let config = CapabilityConfig {
            conversion_url: "http://localhost:9001/convert".to_string(),
            ..Default::default()
        };
        let client = HttpModelConversion::new(&config);
        assert_eq!(client.base_url, "http://localhost:9001/convert");
    }

    #[test]
    fn request_serializes_format_name() {
        let request = ConvertRequest {
            model_ref: "glb://model-1",
            target_format: FileFormat::Step.as_str(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"target_format\":\"step\""));
    }
}
