//! Remote capability interfaces
//!
//! The pipeline drives four vendor-hosted capabilities through narrow
//! request/response traits: image generation, vision analysis, 3D preview,
//! and model conversion. The traits keep the orchestrator testable with
//! in-process fakes; the `Http*` clients in the sibling modules are the
//! production implementations.

mod image_generation;
mod model_conversion;
mod preview_model;
mod vision_analysis;

pub use image_generation::HttpImageGeneration;
pub use model_conversion::HttpModelConversion;
pub use preview_model::HttpPreviewModel;
pub use vision_analysis::HttpVisionAnalysis;

use async_trait::async_trait;
use fab_common::config::CapabilityConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Error from a remote capability call
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Request deadline elapsed; retryable
    #[error("Capability call timed out")]
    Timeout,

    /// Transport-level failure (DNS, connect, reset); retryable
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status; 5xx retryable, 4xx not
    #[error("Capability returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// Response body could not be understood; not retryable
    #[error("Invalid capability response: {0}")]
    InvalidResponse(String),

    /// Capability rejected the input itself; not retryable
    #[error("Capability rejected input: {0}")]
    Rejected(String),
}

impl CapabilityError {
    /// Whether the retry loop should attempt this call again
    pub fn is_retryable(&self) -> bool {
        match self {
            CapabilityError::Timeout | CapabilityError::Network(_) => true,
            CapabilityError::Status { code, .. } => *code >= 500,
            CapabilityError::InvalidResponse(_) | CapabilityError::Rejected(_) => false,
        }
    }

    /// Map a reqwest transport error into the taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CapabilityError::Timeout
        } else {
            CapabilityError::Network(err.to_string())
        }
    }
}

/// Target format for manufacturing file conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Stl,
    Step,
}

impl FileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Stl => "stl",
            FileFormat::Step => "step",
        }
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stl" => Ok(FileFormat::Stl),
            "step" => Ok(FileFormat::Step),
            other => Err(format!("unknown file format: {}", other)),
        }
    }
}

/// Vision analysis output
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResult {
    pub description: String,
    pub features: Vec<String>,
}

/// 3D preview output (first phase of two-phase delivery)
///
/// `model_refs` may be empty when only the fast preview has been produced;
/// the full model assets arrive later through the push completion endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewResult {
    pub preview_video_ref: String,
    pub model_refs: Vec<String>,
}

/// Image generation capability
#[async_trait]
pub trait ImageGeneration: Send + Sync {
    /// Generate a product image from a prompt, returning an image reference
    async fn generate(
        &self,
        prompt: &str,
        style_hints: &[String],
    ) -> Result<String, CapabilityError>;
}

/// Vision analysis capability
#[async_trait]
pub trait VisionAnalysis: Send + Sync {
    /// Analyze a product image, returning a description and feature list
    async fn analyze(
        &self,
        image_ref: &str,
        prompt_hints: Option<&str>,
    ) -> Result<VisionResult, CapabilityError>;
}

/// 3D preview capability
#[async_trait]
pub trait PreviewModel: Send + Sync {
    /// Produce a rotating preview video (and possibly model refs) for an image
    async fn preview(&self, image_ref: &str) -> Result<PreviewResult, CapabilityError>;
}

/// Manufacturing file conversion capability
#[async_trait]
pub trait ModelConversion: Send + Sync {
    /// Convert a model reference into file bytes of the target format
    async fn convert(
        &self,
        model_ref: &str,
        target_format: FileFormat,
    ) -> Result<Vec<u8>, CapabilityError>;
}

/// Bundle of capability handles injected into the orchestrator
#[derive(Clone)]
pub struct Capabilities {
    pub image_generation: Arc<dyn ImageGeneration>,
    pub vision: Arc<dyn VisionAnalysis>,
    pub preview: Arc<dyn PreviewModel>,
    pub conversion: Arc<dyn ModelConversion>,
}

impl Capabilities {
    /// Production bundle of HTTP clients from configuration
    pub fn http(config: &CapabilityConfig) -> Self {
        Self {
            image_generation: Arc::new(HttpImageGeneration::new(config)),
            vision: Arc::new(HttpVisionAnalysis::new(config)),
            preview: Arc::new(HttpPreviewModel::new(config)),
            conversion: Arc::new(HttpModelConversion::new(config)),
        }
    }
}
