//! Gated file delivery and manufacturing quote handlers
//!
//! Both operations consume quota units through the entitlement gate before
//! any work happens. Conversion failures after a grant do not refund the
//! unit.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::capabilities::FileFormat;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::QuoteResult;
use crate::AppState;

/// POST /designs/{id}/files/{format} request
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub user_id: String,
}

/// POST /designs/{id}/quote request
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub user_id: String,
    pub quantity: u32,
}

/// POST /designs/{design_id}/files/{format}
///
/// Convert and deliver a manufacturing file. The response body is the file
/// itself; the remaining quota for the period rides along in a header.
pub async fn download_file(
    State(state): State<AppState>,
    Path((design_id, format)): Path<(Uuid, String)>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<impl IntoResponse> {
    let format: FileFormat = format
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let grant = state
        .orchestrator
        .request_download(design_id, &request.user_id, format)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", grant.file_name))
            .map_err(|e| ApiError::Internal(format!("Invalid file name: {}", e)))?,
    );
    if let Some(remaining) = grant.remaining {
        headers.insert(
            "x-quota-remaining",
            HeaderValue::from_str(&remaining.to_string())
                .map_err(|e| ApiError::Internal(format!("Invalid quota header: {}", e)))?,
        );
    }

    Ok((StatusCode::OK, headers, grant.bytes))
}

/// POST /designs/{design_id}/quote
///
/// Produce a manufacturing quote recommendation; consumes one quote unit.
pub async fn request_quote(
    State(state): State<AppState>,
    Path(design_id): Path<Uuid>,
    Json(request): Json<QuoteRequest>,
) -> ApiResult<Json<QuoteResult>> {
    let quote = state
        .orchestrator
        .request_quote(design_id, &request.user_id, request.quantity)
        .await?;
    Ok(Json(quote))
}
