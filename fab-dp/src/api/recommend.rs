//! Manufacturing recommendation handler

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::recommend::{recommend, Recommendation};
use crate::AppState;

/// POST /recommend request
#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub description: String,
    pub quantity: u32,
}

/// POST /recommend
///
/// Pure rules evaluation; always yields a recommendation.
pub async fn recommend_method(
    State(_state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> ApiResult<Json<Recommendation>> {
    if request.quantity == 0 {
        return Err(ApiError::BadRequest(
            "quantity must be at least 1".to_string(),
        ));
    }

    Ok(Json(recommend(&request.description, request.quantity)))
}
