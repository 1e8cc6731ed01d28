//! HTTP API for the design pipeline
//!
//! Route groups, one module per concern. All handlers speak JSON except the
//! file download (raw bytes) and the SSE event stream.

mod designs;
mod downloads;
mod entitlements;
mod health;
mod recommend;
mod sse;

pub use sse::event_stream;

use crate::AppState;
use axum::routing::{get, post, put};
use axum::Router;

/// Design lifecycle routes
pub fn design_routes() -> Router<AppState> {
    Router::new()
        .route("/designs", post(designs::create_design))
        .route("/designs/:design_id", get(designs::get_design))
        .route("/designs/:design_id/edit", post(designs::edit_design))
        .route("/designs/:design_id/analyze", post(designs::analyze_design))
        .route("/designs/:design_id/preview", post(designs::preview_design))
        .route(
            "/designs/:design_id/preview/assets",
            post(designs::complete_preview_assets),
        )
        .route("/designs/:design_id/cancel", post(designs::cancel_stage))
        .route("/users/:user_id/designs", get(designs::list_designs))
}

/// Gated file delivery and quote routes
pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/designs/:design_id/files/:format",
            post(downloads::download_file),
        )
        .route("/designs/:design_id/quote", post(downloads::request_quote))
}

/// Manufacturing recommendation route
pub fn recommend_routes() -> Router<AppState> {
    Router::new().route("/recommend", post(recommend::recommend_method))
}

/// Subscription/entitlement routes
pub fn entitlement_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/:user_id/entitlements",
            get(entitlements::get_entitlements),
        )
        .route("/users/:user_id/plan", put(entitlements::put_plan))
}

/// Health check route
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health_check))
}
