//! Design lifecycle state machine
//!
//! A design progresses through:
//! DRAFT → ANALYZING → ANALYZED → PREVIEWING_3D → PREVIEW_3D_READY →
//! CONVERTING_MODEL → MODEL_READY, with FAILED reachable from any in-flight
//! state after retry exhaustion. FAILED is resumable: the failed stage may be
//! re-triggered and re-enters its in-flight state.

use chrono::{DateTime, Utc};
use fab_common::events::PipelineStage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Design lifecycle state
///
/// The single source of truth for pipeline progress. Presence of output
/// fields (`analysis`, `three_d`) is derived data, never the control-flow
/// mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignState {
    /// Created from upload or generation, no analysis yet
    Draft,
    /// Vision analysis in flight
    Analyzing,
    /// Analysis stored, manufacturing recommendation available
    Analyzed,
    /// 3D preview generation in flight
    #[serde(rename = "previewing_3d")]
    Previewing3D,
    /// Preview video available (full model assets may still be arriving)
    #[serde(rename = "preview_3d_ready")]
    Preview3DReady,
    /// Manufacturing file conversion in flight
    ConvertingModel,
    /// A manufacturing file has been produced at least once
    ModelReady,
    /// A stage exhausted its retries; resumable via `failed_stage`
    Failed,
}

impl DesignState {
    /// Whether a transition from `self` to `to` follows a legal edge.
    ///
    /// `Failed → <in-flight state>` is the resume edge; the orchestrator
    /// additionally checks that the re-entered stage matches `failed_stage`.
    /// `ModelReady → ConvertingModel` re-enters conversion for another
    /// download (e.g. a second file format).
    pub fn can_transition(self, to: DesignState) -> bool {
        use DesignState::*;
        matches!(
            (self, to),
            (Draft, Analyzing)
                | (Analyzing, Analyzed)
                | (Analyzing, Failed)
                | (Analyzed, Previewing3D)
                | (Previewing3D, Preview3DReady)
                | (Previewing3D, Failed)
                | (Preview3DReady, ConvertingModel)
                | (ConvertingModel, ModelReady)
                | (ConvertingModel, Failed)
                | (ModelReady, ConvertingModel)
                | (Failed, Analyzing)
                | (Failed, Previewing3D)
                | (Failed, ConvertingModel)
        )
    }

    /// States with a stage execution in flight
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            DesignState::Analyzing | DesignState::Previewing3D | DesignState::ConvertingModel
        )
    }

    /// The in-flight state a stage runs under
    pub fn for_stage(stage: PipelineStage) -> DesignState {
        match stage {
            PipelineStage::Analyze => DesignState::Analyzing,
            PipelineStage::Preview => DesignState::Previewing3D,
            PipelineStage::Convert => DesignState::ConvertingModel,
        }
    }

    /// Serialized state name (matches the serde representation)
    pub fn as_str(self) -> &'static str {
        match self {
            DesignState::Draft => "draft",
            DesignState::Analyzing => "analyzing",
            DesignState::Analyzed => "analyzed",
            DesignState::Previewing3D => "previewing_3d",
            DesignState::Preview3DReady => "preview_3d_ready",
            DesignState::ConvertingModel => "converting_model",
            DesignState::ModelReady => "model_ready",
            DesignState::Failed => "failed",
        }
    }
}

impl std::str::FromStr for DesignState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DesignState::Draft),
            "analyzing" => Ok(DesignState::Analyzing),
            "analyzed" => Ok(DesignState::Analyzed),
            "previewing_3d" => Ok(DesignState::Previewing3D),
            "preview_3d_ready" => Ok(DesignState::Preview3DReady),
            "converting_model" => Ok(DesignState::ConvertingModel),
            "model_ready" => Ok(DesignState::ModelReady),
            "failed" => Ok(DesignState::Failed),
            other => Err(format!("unknown design state: {}", other)),
        }
    }
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub design_id: Uuid,
    pub old_state: DesignState,
    pub new_state: DesignState,
    pub transitioned_at: DateTime<Utc>,
}

/// Structured vision-analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignAnalysis {
    pub description: String,
    pub features: Vec<String>,
    pub recommended_method: String,
    pub recommended_materials: Vec<String>,
}

/// 3D asset references produced by the preview/conversion stages
///
/// Delivery is two-phase: the preview video arrives first, full model refs
/// may be pushed later by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeDAssets {
    pub preview_video_ref: String,
    pub model_refs: Vec<String>,
    pub stl_ref: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Sentinel owner for designs created without a signed-in user.
///
/// Anonymous designs are never eligible for gated downloads.
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// One user design tracked through the manufacturing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignRecord {
    /// Unique design identifier, assigned at creation
    pub design_id: Uuid,

    /// Owning user id (`"anonymous"` sentinel permitted)
    pub owner_id: String,

    /// Current lifecycle state
    pub state: DesignState,

    /// Ordered source image references (URIs or content-addressed refs)
    pub source_images: Vec<String>,

    /// Prompt text used for generation or edits
    pub prompt: Option<String>,

    /// Set when this design was derived from another by an edit
    pub original_design_id: Option<Uuid>,

    /// Vision analysis output (populated by the analyze stage)
    pub analysis: Option<DesignAnalysis>,

    /// 3D assets (populated by the preview/conversion stages)
    pub three_d: Option<ThreeDAssets>,

    /// Stage that exhausted its retries, when `state` is Failed
    pub failed_stage: Option<PipelineStage>,

    /// Last error message from a failed stage
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DesignRecord {
    /// Create a new Draft record
    pub fn new(owner_id: String, source_images: Vec<String>, prompt: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            design_id: Uuid::new_v4(),
            owner_id,
            state: DesignState::Draft,
            source_images,
            prompt,
            original_design_id: None,
            analysis: None,
            three_d: None,
            failed_stage: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new Draft derived from an existing design by an edit.
    ///
    /// Edits never mutate the source record's pipeline progress; they fork a
    /// fresh record that references the original.
    pub fn new_edit(original: &DesignRecord, source_images: Vec<String>, prompt: String) -> Self {
        let mut record = Self::new(original.owner_id.clone(), source_images, Some(prompt));
        record.original_design_id = Some(original.design_id);
        record
    }

    /// Transition to a new state, panicking in debug builds on illegal edges.
    ///
    /// Callers validate with `can_transition` first; this keeps the record
    /// and its `updated_at` consistent once the edge is known to be legal.
    pub fn transition_to(&mut self, new_state: DesignState) -> StateTransition {
        debug_assert!(
            self.state.can_transition(new_state),
            "illegal transition {:?} -> {:?}",
            self.state,
            new_state
        );
        let transition = StateTransition {
            design_id: self.design_id,
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        };
        self.state = new_state;
        self.updated_at = transition.transitioned_at;
        transition
    }

    /// Record a stage failure marker (retry exhaustion)
    pub fn mark_failed(&mut self, stage: PipelineStage, error: String) {
        self.failed_stage = Some(stage);
        self.last_error = Some(error);
        self.state = DesignState::Failed;
        self.updated_at = Utc::now();
    }

    /// Clear the failure marker when a stage is re-entered
    pub fn clear_failure(&mut self) {
        self.failed_stage = None;
        self.last_error = None;
    }

    pub fn is_anonymous(&self) -> bool {
        self.owner_id == ANONYMOUS_OWNER
    }

    /// Whether full model assets have arrived (second phase of 3D delivery)
    pub fn has_model_assets(&self) -> bool {
        self.three_d
            .as_ref()
            .map(|t| !t.model_refs.is_empty())
            .unwrap_or(false)
    }
}
