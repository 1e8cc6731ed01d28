//! Pipeline orchestration
//!
//! Drives design records through their lifecycle stages, invoking remote
//! capabilities under a shared retry policy and persisting each transition
//! atomically with its stage output.

mod orchestrator;

pub use orchestrator::{DownloadGrant, PipelineOrchestrator, QuoteResult};

use crate::models::ResourceType;
use fab_common::events::PipelineStage;
use thiserror::Error;
use uuid::Uuid;

/// Orchestrator outcome taxonomy
///
/// Validation and conflict errors surface immediately; transient external
/// errors are absorbed by the retry loop and only escalate to `StageFailed`
/// after exhaustion; quota denials are never retried automatically.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing input, detected before any external call
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Design does not exist or is not addressable by the caller
    #[error("Design not found: {0}")]
    NotFound(Uuid),

    /// Concurrent stage execution or duplicate advancement on one design
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The design has not reached the state this operation requires
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Entitlement gate denial; user-actionable (upgrade plan)
    #[error("Quota exceeded for {resource}")]
    QuotaExceeded { resource: ResourceType },

    /// A stage exhausted its retries
    #[error("Stage {stage} failed: {cause}")]
    StageFailed {
        stage: PipelineStage,
        cause: String,
    },

    /// An in-flight stage was cancelled; no transition was committed
    #[error("Stage {stage} cancelled")]
    Cancelled { stage: PipelineStage },

    /// Prompt-based image generation failed before a record existed
    #[error("Image generation failed: {0}")]
    GenerationFailed(String),

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] fab_common::Error),
}
