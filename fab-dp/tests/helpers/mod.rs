//! Shared test helpers: file-backed test databases and scriptable mock
//! capabilities for driving the orchestrator without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use fab_common::events::EventBus;
use fab_dp::capabilities::{
    Capabilities, CapabilityError, FileFormat, ImageGeneration, ModelConversion, PreviewModel,
    PreviewResult, VisionAnalysis, VisionResult,
};
use fab_dp::entitlement::EntitlementGate;
use fab_dp::pipeline::PipelineOrchestrator;
use fab_dp::retry::RetryPolicy;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// File-backed test database; in-memory SQLite gives every pooled
/// connection its own database, which breaks cross-connection tests.
pub async fn test_pool() -> (SqlitePool, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("fab-test.db");
    let pool = fab_dp::db::init_database_pool(&db_path)
        .await
        .expect("Failed to initialize test database");
    (pool, dir)
}

/// Retry policy with a negligible backoff so exhaustion tests run fast
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

/// Orchestrator over mock capabilities plus a subscribed event bus
pub fn test_orchestrator(
    pool: &SqlitePool,
    capabilities: Capabilities,
    retry: RetryPolicy,
) -> (PipelineOrchestrator, EventBus) {
    let event_bus = EventBus::new(256);
    let gate = EntitlementGate::new(pool.clone());
    let orchestrator = PipelineOrchestrator::new(
        pool.clone(),
        event_bus.clone(),
        capabilities,
        gate,
        retry,
    );
    (orchestrator, event_bus)
}

/// Scriptable mock: fails the first `fail_first` calls with a retryable
/// error, then succeeds after `delay`.
pub struct MockVision {
    pub calls: AtomicU32,
    pub fail_first: u32,
    pub delay: Duration,
    pub description: String,
    pub features: Vec<String>,
}

impl MockVision {
    pub fn ok(description: &str) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
            description: description.to_string(),
            features: vec!["functional".to_string()],
        }
    }

    pub fn failing_first(n: u32, description: &str) -> Self {
        Self {
            fail_first: n,
            ..Self::ok(description)
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX, "unused")
    }

    pub fn slow(description: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok(description)
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionAnalysis for MockVision {
    async fn analyze(
        &self,
        _image_ref: &str,
        _prompt_hints: Option<&str>,
    ) -> Result<VisionResult, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call <= self.fail_first {
            return Err(CapabilityError::Status {
                code: 503,
                message: format!("vision overloaded (call {})", call),
            });
        }
        Ok(VisionResult {
            description: self.description.clone(),
            features: self.features.clone(),
        })
    }
}

/// Mock 3D preview; returns the configured model refs (possibly none, for
/// two-phase delivery scenarios).
pub struct MockPreview {
    pub calls: AtomicU32,
    pub fail_first: u32,
    pub model_refs: Vec<String>,
}

impl MockPreview {
    pub fn ok_with_models() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
            model_refs: vec!["glb://model-1".to_string()],
        }
    }

    pub fn ok_preview_only() -> Self {
        Self {
            model_refs: Vec::new(),
            ..Self::ok_with_models()
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreviewModel for MockPreview {
    async fn preview(&self, _image_ref: &str) -> Result<PreviewResult, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(CapabilityError::Timeout);
        }
        Ok(PreviewResult {
            preview_video_ref: "vid://spin-1".to_string(),
            model_refs: self.model_refs.clone(),
        })
    }
}

/// Mock file conversion
pub struct MockConversion {
    pub calls: AtomicU32,
    pub fail_first: u32,
}

impl MockConversion {
    pub fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_first: 0,
        }
    }

    pub fn failing_first(n: u32) -> Self {
        Self {
            fail_first: n,
            ..Self::ok()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelConversion for MockConversion {
    async fn convert(
        &self,
        model_ref: &str,
        target_format: FileFormat,
    ) -> Result<Vec<u8>, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(CapabilityError::Status {
                code: 500,
                message: "converter crashed".to_string(),
            });
        }
        Ok(format!("{} as {}", model_ref, target_format).into_bytes())
    }
}

/// Mock image generation
pub struct MockImageGeneration {
    pub calls: AtomicU32,
}

impl MockImageGeneration {
    pub fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ImageGeneration for MockImageGeneration {
    async fn generate(
        &self,
        prompt: &str,
        _style_hints: &[String],
    ) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("img://generated/{}", prompt.len()))
    }
}

/// Capability bundle assembled from individual mock handles
pub fn mock_capabilities(
    image_generation: Arc<MockImageGeneration>,
    vision: Arc<MockVision>,
    preview: Arc<MockPreview>,
    conversion: Arc<MockConversion>,
) -> Capabilities {
    Capabilities {
        image_generation,
        vision,
        preview,
        conversion,
    }
}

/// All-success capability bundle for tests that don't script failures
pub fn default_capabilities() -> Capabilities {
    mock_capabilities(
        Arc::new(MockImageGeneration::ok()),
        Arc::new(MockVision::ok("a smooth detailed figurine")),
        Arc::new(MockPreview::ok_with_models()),
        Arc::new(MockConversion::ok()),
    )
}
