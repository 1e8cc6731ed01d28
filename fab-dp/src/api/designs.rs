//! Design lifecycle API handlers
//!
//! POST /designs, GET /designs/{id}, stage advancement triggers, the
//! full-model push completion, and cancellation.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{DesignRecord, ANONYMOUS_OWNER};
use crate::AppState;

/// POST /designs request
///
/// Either `source_images` (upload path) or `prompt` (generation path) must
/// be present. Without an owner the design belongs to the anonymous
/// sentinel owner and stays ineligible for gated downloads.
#[derive(Debug, Deserialize)]
pub struct CreateDesignRequest {
    pub owner_id: Option<String>,
    #[serde(default)]
    pub source_images: Vec<String>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub style_hints: Vec<String>,
}

/// POST /designs/{id}/edit request
#[derive(Debug, Deserialize)]
pub struct EditDesignRequest {
    pub prompt: String,
}

/// POST /designs/{id}/preview/assets request (remote-service push)
#[derive(Debug, Deserialize)]
pub struct PreviewAssetsRequest {
    pub model_refs: Vec<String>,
}

/// POST /designs/{id}/cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub design_id: Uuid,
    pub cancelled: bool,
}

/// GET /users/{user_id}/designs response
#[derive(Debug, Serialize)]
pub struct DesignListResponse {
    pub designs: Vec<DesignRecord>,
}

/// POST /designs
///
/// Create a design from uploaded image references, or generate one from a
/// prompt when no images are supplied.
pub async fn create_design(
    State(state): State<AppState>,
    Json(request): Json<CreateDesignRequest>,
) -> ApiResult<Json<DesignRecord>> {
    let owner_id = request
        .owner_id
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| ANONYMOUS_OWNER.to_string());

    let record = if !request.source_images.is_empty() {
        state
            .orchestrator
            .create_design(owner_id, request.source_images, request.prompt)
            .await?
    } else if let Some(prompt) = request.prompt {
        state
            .orchestrator
            .generate_design(owner_id, prompt, request.style_hints)
            .await?
    } else {
        return Err(ApiError::BadRequest(
            "either source_images or prompt is required".to_string(),
        ));
    };

    Ok(Json(record))
}

/// GET /designs/{design_id}
pub async fn get_design(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
) -> ApiResult<Json<DesignRecord>> {
    let record = crate::db::designs::load_design(&state.db, design_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Design not found: {}", design_id)))?;

    Ok(Json(record))
}

/// GET /users/{user_id}/designs
pub async fn list_designs(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<DesignListResponse>> {
    let designs = crate::db::designs::list_designs_for_owner(&state.db, &user_id).await?;
    Ok(Json(DesignListResponse { designs }))
}

/// POST /designs/{design_id}/edit
///
/// Fork a new Draft from an existing design; the original keeps its
/// pipeline progress.
pub async fn edit_design(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
    Json(request): Json<EditDesignRequest>,
) -> ApiResult<Json<DesignRecord>> {
    let record = state
        .orchestrator
        .edit_design(design_id, request.prompt)
        .await?;
    Ok(Json(record))
}

/// POST /designs/{design_id}/analyze
///
/// Run the vision analysis stage. Returns the record in its post-stage
/// state; stage progress is also pushed on the event stream.
pub async fn analyze_design(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
) -> ApiResult<Json<DesignRecord>> {
    let record = state.orchestrator.advance_analyze(design_id).await?;
    Ok(Json(record))
}

/// POST /designs/{design_id}/preview
pub async fn preview_design(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
) -> ApiResult<Json<DesignRecord>> {
    let record = state.orchestrator.advance_preview(design_id).await?;
    Ok(Json(record))
}

/// POST /designs/{design_id}/preview/assets
///
/// Push endpoint for the remote 3D service delivering full model assets
/// after the fast preview phase.
pub async fn complete_preview_assets(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
    Json(request): Json<PreviewAssetsRequest>,
) -> ApiResult<Json<DesignRecord>> {
    let record = state
        .orchestrator
        .complete_model_assets(design_id, request.model_refs)
        .await?;
    Ok(Json(record))
}

/// POST /designs/{design_id}/cancel
///
/// Cancel the in-flight stage, if any. The record keeps its pre-stage state.
pub async fn cancel_stage(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    let cancelled = state.orchestrator.cancel(design_id);
    Ok(Json(CancelResponse {
        design_id,
        cancelled,
    }))
}
