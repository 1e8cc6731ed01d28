//! fab-dp library interface
//!
//! Exposes the pipeline core and router construction for integration tests
//! and the service binary.

pub mod api;
pub mod capabilities;
pub mod db;
pub mod entitlement;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod recommend;
pub mod retry;

pub use crate::error::{ApiError, ApiResult};

use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use fab_common::events::EventBus;
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::PipelineOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Pipeline orchestrator (owns the per-design in-flight registry)
    pub orchestrator: PipelineOrchestrator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, orchestrator: PipelineOrchestrator) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::design_routes())
        .merge(api::download_routes())
        .merge(api::recommend_routes())
        .merge(api::entitlement_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
