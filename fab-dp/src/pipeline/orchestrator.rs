//! Design pipeline orchestrator
//!
//! Executes pipeline stages for a single design: validates the trigger,
//! commits the in-flight state, invokes the remote capability under the
//! shared retry policy, and commits the stage output together with the next
//! state in one atomic write. At most one stage execution is in flight per
//! design at a time; concurrent triggers are rejected, not queued, so a
//! double-click can never double-charge a remote service.

use crate::capabilities::{Capabilities, CapabilityError, FileFormat};
use crate::db::designs;
use crate::entitlement::EntitlementGate;
use crate::models::{DesignAnalysis, DesignRecord, DesignState, ResourceType, ThreeDAssets};
use crate::pipeline::PipelineError;
use crate::recommend::{recommend, Recommendation};
use crate::retry::{RetryError, RetryPolicy};
use chrono::Utc;
use fab_common::events::{EventBus, PipelineEvent, PipelineStage};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Granted download: the converted file plus the post-conversion record
#[derive(Debug)]
pub struct DownloadGrant {
    pub record: DesignRecord,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Remaining downloads of this type in the period; None for unlimited
    pub remaining: Option<u32>,
}

/// Granted manufacturing quote
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuoteResult {
    pub design_id: Uuid,
    pub quantity: u32,
    pub recommendation: Recommendation,
    /// Remaining quotes in the period; None for unlimited
    pub remaining: Option<u32>,
}

/// Pre-stage record fields restored when a stage is cancelled
struct Snapshot {
    state: DesignState,
    failed_stage: Option<PipelineStage>,
    last_error: Option<String>,
}

type InFlightMap = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Removes the design from the in-flight registry when the stage ends,
/// however it ends.
struct StageGuard {
    map: InFlightMap,
    design_id: Uuid,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        self.map
            .lock()
            .expect("in-flight registry poisoned")
            .remove(&self.design_id);
    }
}

/// Outcome of a capability invocation raced against cancellation
enum Invocation<T> {
    Done(Result<T, RetryError<CapabilityError>>),
    Cancelled,
}

/// Drives design records through generation, analysis, 3D preview, and file
/// conversion.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    capabilities: Capabilities,
    gate: EntitlementGate,
    retry: RetryPolicy,
    in_flight: InFlightMap,
}

impl PipelineOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        capabilities: Capabilities,
        gate: EntitlementGate,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            db,
            event_bus,
            capabilities,
            gate,
            retry,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn gate(&self) -> &EntitlementGate {
        &self.gate
    }

    /// Create a design from uploaded image references
    pub async fn create_design(
        &self,
        owner_id: String,
        source_images: Vec<String>,
        prompt: Option<String>,
    ) -> Result<DesignRecord, PipelineError> {
        if owner_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "owner_id must not be empty".to_string(),
            ));
        }
        if source_images.is_empty() || source_images.iter().any(|r| r.trim().is_empty()) {
            return Err(PipelineError::Validation(
                "at least one non-empty source image reference is required".to_string(),
            ));
        }

        let record = DesignRecord::new(owner_id, source_images, prompt);
        designs::insert_design(&self.db, &record).await?;

        tracing::info!(design_id = %record.design_id, owner_id = %record.owner_id, "Design created");
        let _ = self.event_bus.emit(PipelineEvent::DesignCreated {
            design_id: record.design_id,
            owner_id: record.owner_id.clone(),
            timestamp: record.created_at,
        });

        Ok(record)
    }

    /// Create a design by generating an image from a prompt.
    ///
    /// Generation failures leave no record behind; the design exists only
    /// once an image reference does.
    pub async fn generate_design(
        &self,
        owner_id: String,
        prompt: String,
        style_hints: Vec<String>,
    ) -> Result<DesignRecord, PipelineError> {
        if owner_id.trim().is_empty() {
            return Err(PipelineError::Validation(
                "owner_id must not be empty".to_string(),
            ));
        }
        if prompt.trim().is_empty() {
            return Err(PipelineError::Validation(
                "prompt must not be empty".to_string(),
            ));
        }

        let image_ref = self
            .retry
            .run(
                "generate_image",
                |e: &CapabilityError| e.is_retryable(),
                |_| self.capabilities.image_generation.generate(&prompt, &style_hints),
            )
            .await
            .map_err(|e| PipelineError::GenerationFailed(e.to_string()))?;

        let record = DesignRecord::new(owner_id, vec![image_ref], Some(prompt));
        designs::insert_design(&self.db, &record).await?;

        tracing::info!(design_id = %record.design_id, owner_id = %record.owner_id, "Design generated");
        let _ = self.event_bus.emit(PipelineEvent::DesignCreated {
            design_id: record.design_id,
            owner_id: record.owner_id.clone(),
            timestamp: record.created_at,
        });

        Ok(record)
    }

    /// Derive a new Draft from an existing design by an edit prompt.
    ///
    /// The source record's pipeline progress is never rewound; edits fork a
    /// fresh record referencing the original.
    pub async fn edit_design(
        &self,
        design_id: Uuid,
        prompt: String,
    ) -> Result<DesignRecord, PipelineError> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::Validation(
                "edit prompt must not be empty".to_string(),
            ));
        }

        let original = self.load(design_id).await?;
        let style_hints: Vec<String> = original.source_images.first().cloned().into_iter().collect();

        let image_ref = self
            .retry
            .run(
                "edit_image",
                |e: &CapabilityError| e.is_retryable(),
                |_| self.capabilities.image_generation.generate(&prompt, &style_hints),
            )
            .await
            .map_err(|e| PipelineError::GenerationFailed(e.to_string()))?;

        let record = DesignRecord::new_edit(&original, vec![image_ref], prompt);
        designs::insert_design(&self.db, &record).await?;

        tracing::info!(
            design_id = %record.design_id,
            original_design_id = %original.design_id,
            "Design edit forked"
        );
        let _ = self.event_bus.emit(PipelineEvent::DesignCreated {
            design_id: record.design_id,
            owner_id: record.owner_id.clone(),
            timestamp: record.created_at,
        });

        Ok(record)
    }

    /// Run the vision analysis stage for a design
    pub async fn advance_analyze(&self, design_id: Uuid) -> Result<DesignRecord, PipelineError> {
        let (_guard, token) = self.try_begin(design_id)?;
        let mut record = self.load(design_id).await?;

        if record.source_images.is_empty() {
            return Err(PipelineError::Validation(
                "design has no source images to analyze".to_string(),
            ));
        }

        let stage = PipelineStage::Analyze;
        let snapshot = self.begin_stage(&mut record, stage).await?;

        let image_ref = record.source_images[0].clone();
        let prompt_hints = record.prompt.clone();

        let invocation = tokio::select! {
            _ = token.cancelled() => Invocation::Cancelled,
            result = self.retry.run(
                "analyze",
                |e: &CapabilityError| e.is_retryable(),
                |_| self.capabilities.vision.analyze(&image_ref, prompt_hints.as_deref()),
            ) => Invocation::Done(result),
        };

        match invocation {
            Invocation::Done(Ok(vision)) => {
                // Recommendation keywords can appear in either field
                let keyword_text = format!("{} {}", vision.description, vision.features.join(" "));
                let rec = recommend(&keyword_text, 1);

                record.analysis = Some(DesignAnalysis {
                    description: vision.description,
                    features: vision.features,
                    recommended_method: rec.method.to_string(),
                    recommended_materials: rec.materials,
                });
                self.commit_stage(&mut record, stage, DesignState::Analyzed)
                    .await?;
                Ok(record)
            }
            Invocation::Done(Err(err)) => Err(self.fail_stage(&mut record, stage, err).await?),
            Invocation::Cancelled => Err(self.cancel_stage(&mut record, stage, snapshot).await?),
        }
    }

    /// Run the 3D preview stage for a design.
    ///
    /// Two-phase delivery: the preview video (and any already-available
    /// model refs) commits here; remaining model assets arrive later via
    /// [`complete_model_assets`](Self::complete_model_assets).
    pub async fn advance_preview(&self, design_id: Uuid) -> Result<DesignRecord, PipelineError> {
        let (_guard, token) = self.try_begin(design_id)?;
        let mut record = self.load(design_id).await?;

        if record.source_images.is_empty() {
            return Err(PipelineError::Validation(
                "design has no source image to preview".to_string(),
            ));
        }

        let stage = PipelineStage::Preview;
        let snapshot = self.begin_stage(&mut record, stage).await?;

        let image_ref = record.source_images[0].clone();

        let invocation = tokio::select! {
            _ = token.cancelled() => Invocation::Cancelled,
            result = self.retry.run(
                "preview",
                |e: &CapabilityError| e.is_retryable(),
                |_| self.capabilities.preview.preview(&image_ref),
            ) => Invocation::Done(result),
        };

        match invocation {
            Invocation::Done(Ok(preview)) => {
                record.three_d = Some(ThreeDAssets {
                    preview_video_ref: preview.preview_video_ref,
                    model_refs: preview.model_refs,
                    stl_ref: None,
                    generated_at: Utc::now(),
                });
                self.commit_stage(&mut record, stage, DesignState::Preview3DReady)
                    .await?;
                Ok(record)
            }
            Invocation::Done(Err(err)) => Err(self.fail_stage(&mut record, stage, err).await?),
            Invocation::Cancelled => Err(self.cancel_stage(&mut record, stage, snapshot).await?),
        }
    }

    /// Record the arrival of full model assets (second phase of 3D delivery).
    ///
    /// A sub-completion within `Preview3DReady`, not a state transition.
    pub async fn complete_model_assets(
        &self,
        design_id: Uuid,
        model_refs: Vec<String>,
    ) -> Result<DesignRecord, PipelineError> {
        if model_refs.is_empty() || model_refs.iter().any(|r| r.trim().is_empty()) {
            return Err(PipelineError::Validation(
                "model_refs must not be empty".to_string(),
            ));
        }

        let mut record = self.load(design_id).await?;

        if record.state != DesignState::Preview3DReady {
            return Err(PipelineError::NotReady(format!(
                "design is in state {}, expected {}",
                record.state.as_str(),
                DesignState::Preview3DReady.as_str()
            )));
        }

        let three_d = record.three_d.as_mut().ok_or_else(|| {
            PipelineError::NotReady("design has no preview assets yet".to_string())
        })?;
        three_d.model_refs = model_refs;
        let model_count = three_d.model_refs.len();
        record.updated_at = Utc::now();

        if !designs::update_design(&self.db, &record, DesignState::Preview3DReady).await? {
            return Err(PipelineError::Conflict(format!(
                "design {} changed concurrently",
                design_id
            )));
        }

        tracing::info!(design_id = %design_id, model_count, "Full model assets arrived");
        let _ = self.event_bus.emit(PipelineEvent::ModelAssetsReady {
            design_id,
            model_count,
            timestamp: record.updated_at,
        });

        Ok(record)
    }

    /// Gate and run the manufacturing-file conversion stage, returning the
    /// converted file bytes.
    ///
    /// The entitlement gate is consulted before the conversion call; a
    /// consumed quota unit is not refunded if the conversion subsequently
    /// fails.
    pub async fn request_download(
        &self,
        design_id: Uuid,
        user_id: &str,
        format: FileFormat,
    ) -> Result<DownloadGrant, PipelineError> {
        let (_guard, token) = self.try_begin(design_id)?;
        let mut record = self.load(design_id).await?;

        if record.is_anonymous() {
            return Err(PipelineError::Validation(
                "anonymous designs are not eligible for gated downloads".to_string(),
            ));
        }
        if record.owner_id != user_id {
            // Designs are only addressable by their owner
            return Err(PipelineError::NotFound(design_id));
        }
        if !record.has_model_assets() {
            return Err(PipelineError::NotReady(
                "3D model assets are not available yet".to_string(),
            ));
        }

        // Reject illegal stage entry before any quota unit is consumed
        validate_trigger(&record, PipelineStage::Convert)?;

        let resource = match format {
            FileFormat::Stl => ResourceType::Stl,
            FileFormat::Step => ResourceType::Step,
        };

        let entitlement = self.gate.authorize(user_id, resource).await?;
        if !entitlement.allowed {
            return Err(PipelineError::QuotaExceeded { resource });
        }

        let _ = self.event_bus.emit(PipelineEvent::DownloadRecorded {
            user_id: user_id.to_string(),
            design_id,
            resource_type: resource.as_str().to_string(),
            remaining: entitlement.remaining,
            timestamp: Utc::now(),
        });

        let stage = PipelineStage::Convert;
        let snapshot = self.begin_stage(&mut record, stage).await?;

        let model_ref = record
            .three_d
            .as_ref()
            .and_then(|t| t.model_refs.first())
            .cloned()
            .expect("model assets checked above");

        let invocation = tokio::select! {
            _ = token.cancelled() => Invocation::Cancelled,
            result = self.retry.run(
                "convert",
                |e: &CapabilityError| e.is_retryable(),
                |_| self.capabilities.conversion.convert(&model_ref, format),
            ) => Invocation::Done(result),
        };

        match invocation {
            Invocation::Done(Ok(bytes)) => {
                let file_name = format!("{}.{}", design_id, format.as_str());
                if format == FileFormat::Stl {
                    if let Some(three_d) = record.three_d.as_mut() {
                        three_d.stl_ref = Some(file_name.clone());
                    }
                }
                self.commit_stage(&mut record, stage, DesignState::ModelReady)
                    .await?;
                Ok(DownloadGrant {
                    record,
                    file_name,
                    bytes,
                    remaining: entitlement.remaining,
                })
            }
            // Quota unit stays consumed on conversion failure
            Invocation::Done(Err(err)) => Err(self.fail_stage(&mut record, stage, err).await?),
            Invocation::Cancelled => Err(self.cancel_stage(&mut record, stage, snapshot).await?),
        }
    }

    /// Gate and produce a manufacturing quote recommendation.
    ///
    /// Pure computation after the gate; no pipeline state changes.
    pub async fn request_quote(
        &self,
        design_id: Uuid,
        user_id: &str,
        quantity: u32,
    ) -> Result<QuoteResult, PipelineError> {
        if quantity == 0 {
            return Err(PipelineError::Validation(
                "quantity must be at least 1".to_string(),
            ));
        }

        let record = self.load(design_id).await?;

        if record.is_anonymous() {
            return Err(PipelineError::Validation(
                "anonymous designs are not eligible for manufacturing quotes".to_string(),
            ));
        }
        if record.owner_id != user_id {
            return Err(PipelineError::NotFound(design_id));
        }

        let analysis = record.analysis.as_ref().ok_or_else(|| {
            PipelineError::NotReady("design has not been analyzed yet".to_string())
        })?;

        let resource = ResourceType::ManufacturingQuote;
        let entitlement = self.gate.authorize(user_id, resource).await?;
        if !entitlement.allowed {
            return Err(PipelineError::QuotaExceeded { resource });
        }

        let _ = self.event_bus.emit(PipelineEvent::DownloadRecorded {
            user_id: user_id.to_string(),
            design_id,
            resource_type: resource.as_str().to_string(),
            remaining: entitlement.remaining,
            timestamp: Utc::now(),
        });

        let keyword_text = format!("{} {}", analysis.description, analysis.features.join(" "));
        let recommendation = recommend(&keyword_text, quantity);

        tracing::info!(
            design_id = %design_id,
            user_id,
            quantity,
            method = %recommendation.method,
            "Manufacturing quote produced"
        );

        Ok(QuoteResult {
            design_id,
            quantity,
            recommendation,
            remaining: entitlement.remaining,
        })
    }

    /// Cancel the in-flight stage for a design, if any.
    ///
    /// Returns whether a stage was in flight. The stage's record keeps its
    /// pre-stage state; the remote call's eventual completion is discarded.
    pub fn cancel(&self, design_id: Uuid) -> bool {
        let map = self.in_flight.lock().expect("in-flight registry poisoned");
        match map.get(&design_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // ---- internals ----

    async fn load(&self, design_id: Uuid) -> Result<DesignRecord, PipelineError> {
        designs::load_design(&self.db, design_id)
            .await?
            .ok_or(PipelineError::NotFound(design_id))
    }

    /// Claim the per-design execution slot, or reject with Conflict
    fn try_begin(
        &self,
        design_id: Uuid,
    ) -> Result<(StageGuard, CancellationToken), PipelineError> {
        let mut map = self.in_flight.lock().expect("in-flight registry poisoned");
        if map.contains_key(&design_id) {
            return Err(PipelineError::Conflict(format!(
                "a stage is already in flight for design {}",
                design_id
            )));
        }
        let token = CancellationToken::new();
        map.insert(design_id, token.clone());
        Ok((
            StageGuard {
                map: self.in_flight.clone(),
                design_id,
            },
            token,
        ))
    }

    /// Validate the trigger, commit the in-flight state, emit StageStarted
    async fn begin_stage(
        &self,
        record: &mut DesignRecord,
        stage: PipelineStage,
    ) -> Result<Snapshot, PipelineError> {
        validate_trigger(record, stage)?;

        let snapshot = Snapshot {
            state: record.state,
            failed_stage: record.failed_stage,
            last_error: record.last_error.clone(),
        };

        record.clear_failure();
        record.transition_to(DesignState::for_stage(stage));
        self.persist_expected(record, snapshot.state).await?;

        tracing::info!(design_id = %record.design_id, stage = %stage, "Stage started");
        let _ = self.event_bus.emit(PipelineEvent::StageStarted {
            design_id: record.design_id,
            stage,
            timestamp: record.updated_at,
        });

        Ok(snapshot)
    }

    /// Commit stage output and the forward transition in one atomic write
    async fn commit_stage(
        &self,
        record: &mut DesignRecord,
        stage: PipelineStage,
        next_state: DesignState,
    ) -> Result<(), PipelineError> {
        let in_flight_state = record.state;
        record.transition_to(next_state);
        self.persist_expected(record, in_flight_state).await?;

        tracing::info!(
            design_id = %record.design_id,
            stage = %stage,
            state = next_state.as_str(),
            "Stage completed"
        );
        let _ = self.event_bus.emit(PipelineEvent::StageCompleted {
            design_id: record.design_id,
            stage,
            new_state: next_state.as_str().to_string(),
            timestamp: record.updated_at,
        });

        Ok(())
    }

    /// Persist the failure marker after retry exhaustion
    async fn fail_stage(
        &self,
        record: &mut DesignRecord,
        stage: PipelineStage,
        err: RetryError<CapabilityError>,
    ) -> Result<PipelineError, PipelineError> {
        let cause = err.to_string();
        let in_flight_state = record.state;

        record.mark_failed(stage, cause.clone());
        self.persist_expected(record, in_flight_state).await?;

        tracing::error!(
            design_id = %record.design_id,
            stage = %stage,
            error = %cause,
            "Stage failed"
        );
        let _ = self.event_bus.emit(PipelineEvent::StageFailed {
            design_id: record.design_id,
            stage,
            error: cause.clone(),
            timestamp: record.updated_at,
        });

        Ok(PipelineError::StageFailed { stage, cause })
    }

    /// Restore the pre-stage record after cancellation; no transition commits
    async fn cancel_stage(
        &self,
        record: &mut DesignRecord,
        stage: PipelineStage,
        snapshot: Snapshot,
    ) -> Result<PipelineError, PipelineError> {
        let in_flight_state = record.state;

        // Direct restore, not a transition: cancellation rewinds the
        // in-flight marker to exactly what the caller observed before.
        record.state = snapshot.state;
        record.failed_stage = snapshot.failed_stage;
        record.last_error = snapshot.last_error;
        record.updated_at = Utc::now();
        self.persist_expected(record, in_flight_state).await?;

        tracing::info!(design_id = %record.design_id, stage = %stage, "Stage cancelled");
        let _ = self.event_bus.emit(PipelineEvent::StageCancelled {
            design_id: record.design_id,
            stage,
            timestamp: record.updated_at,
        });

        Ok(PipelineError::Cancelled { stage })
    }

    async fn persist_expected(
        &self,
        record: &DesignRecord,
        expected: DesignState,
    ) -> Result<(), PipelineError> {
        if designs::update_design(&self.db, record, expected).await? {
            Ok(())
        } else {
            Err(PipelineError::Conflict(format!(
                "design {} changed concurrently",
                record.design_id
            )))
        }
    }
}

/// Check that `stage` may be triggered from the record's current state.
///
/// Failed records only re-enter the stage that failed; in-flight states
/// reject further triggers outright.
fn validate_trigger(record: &DesignRecord, stage: PipelineStage) -> Result<(), PipelineError> {
    let state = record.state;

    if state.is_in_flight() {
        return Err(PipelineError::Conflict(format!(
            "design {} already has a stage in flight (state {})",
            record.design_id,
            state.as_str()
        )));
    }

    let legal = match (stage, state) {
        (PipelineStage::Analyze, DesignState::Draft) => true,
        (PipelineStage::Preview, DesignState::Analyzed) => true,
        (PipelineStage::Convert, DesignState::Preview3DReady | DesignState::ModelReady) => true,
        (s, DesignState::Failed) => record.failed_stage == Some(s),
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(PipelineError::Conflict(format!(
            "design {} in state {} cannot enter stage {}",
            record.design_id,
            state.as_str(),
            stage
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_in_state(state: DesignState) -> DesignRecord {
        let mut record = DesignRecord::new(
            "user-1".to_string(),
            vec!["img://a".to_string()],
            None,
        );
        record.state = state;
        record
    }

    #[test]
    fn triggers_match_the_state_machine() {
        assert!(validate_trigger(&record_in_state(DesignState::Draft), PipelineStage::Analyze).is_ok());
        assert!(validate_trigger(&record_in_state(DesignState::Analyzed), PipelineStage::Preview).is_ok());
        assert!(
            validate_trigger(&record_in_state(DesignState::Preview3DReady), PipelineStage::Convert)
                .is_ok()
        );
        assert!(
            validate_trigger(&record_in_state(DesignState::ModelReady), PipelineStage::Convert)
                .is_ok()
        );

        assert!(validate_trigger(&record_in_state(DesignState::Draft), PipelineStage::Preview).is_err());
        assert!(
            validate_trigger(&record_in_state(DesignState::Analyzed), PipelineStage::Analyze).is_err()
        );
        assert!(validate_trigger(&record_in_state(DesignState::Draft), PipelineStage::Convert).is_err());
    }

    #[test]
    fn in_flight_states_reject_all_triggers() {
        for state in [
            DesignState::Analyzing,
            DesignState::Previewing3D,
            DesignState::ConvertingModel,
        ] {
            for stage in [
                PipelineStage::Analyze,
                PipelineStage::Preview,
                PipelineStage::Convert,
            ] {
                assert!(
                    matches!(
                        validate_trigger(&record_in_state(state), stage),
                        Err(PipelineError::Conflict(_))
                    ),
                    "{:?} should reject {:?}",
                    state,
                    stage
                );
            }
        }
    }

    #[test]
    fn failed_records_resume_only_their_failed_stage() {
        let mut record = record_in_state(DesignState::Failed);
        record.failed_stage = Some(PipelineStage::Preview);

        assert!(validate_trigger(&record, PipelineStage::Preview).is_ok());
        assert!(validate_trigger(&record, PipelineStage::Analyze).is_err());
        assert!(validate_trigger(&record, PipelineStage::Convert).is_err());
    }
}
