//! Subscription and entitlement handlers
//!
//! GET exposes plan + current-period usage to the UI. PUT is the write path
//! for the billing collaborator's payment webhooks; the pipeline core itself
//! never changes a plan.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::entitlement::EntitlementSummary;
use crate::error::{ApiError, ApiResult};
use crate::models::{PlanType, SubscriptionPlan};
use crate::AppState;

/// PUT /users/{user_id}/plan request
#[derive(Debug, Deserialize)]
pub struct PutPlanRequest {
    pub plan_type: String,
}

/// GET /users/{user_id}/entitlements
pub async fn get_entitlements(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<EntitlementSummary>> {
    let summary = state.orchestrator.gate().usage(&user_id).await?;
    Ok(Json(summary))
}

/// PUT /users/{user_id}/plan
///
/// Billing-webhook write: sets the plan and resets the billing period.
pub async fn put_plan(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<PutPlanRequest>,
) -> ApiResult<Json<SubscriptionPlan>> {
    let plan_type: PlanType = request
        .plan_type
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let plan = crate::db::subscriptions::upsert_plan(
        &state.db,
        &user_id,
        plan_type,
        chrono::Utc::now(),
    )
    .await?;

    tracing::info!(user_id = %user_id, plan = plan_type.as_str(), "Subscription plan updated");

    Ok(Json(plan))
}
