//! Integration tests for the fab-dp HTTP API

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use fab_common::events::EventBus;
use fab_dp::models::ResourceType;
use helpers::*;
use http_body_util::BodyExt;
use serde_json::json;
use tower::util::ServiceExt;

/// Test helper: app over a file-backed database and mock capabilities
async fn create_test_app() -> (axum::Router, fab_dp::AppState, tempfile::TempDir) {
    let (pool, dir) = test_pool().await;

    let event_bus = EventBus::new(100);
    let gate = fab_dp::entitlement::EntitlementGate::new(pool.clone());
    let orchestrator = fab_dp::pipeline::PipelineOrchestrator::new(
        pool.clone(),
        event_bus.clone(),
        default_capabilities(),
        gate,
        fast_retry(),
    );

    let state = fab_dp::AppState::new(pool, event_bus, orchestrator);
    let app = fab_dp::build_router(state.clone());

    (app, state, dir)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "fab-dp");
}

#[tokio::test]
async fn recommend_endpoint_is_deterministic() {
    let (app, _state, _dir) = create_test_app().await;

    let request_body = json!({"description": "high detail smooth finish", "quantity": 10});

    let first = app
        .clone()
        .oneshot(post_json("/recommend", request_body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = json_body(first).await;

    assert_eq!(first["method"], "resin");
    assert_eq!(first["materials"][0], "Standard Resin");

    let second = app
        .oneshot(post_json("/recommend", request_body))
        .await
        .unwrap();
    let second = json_body(second).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn recommend_rejects_zero_quantity() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .oneshot(post_json(
            "/recommend",
            json!({"description": "anything", "quantity": 0}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn designs_can_be_created_and_fetched() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/designs",
            json!({"owner_id": "maker", "source_images": ["img://chair"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let created = json_body(response).await;
    assert_eq!(created["state"], "draft");
    assert_eq!(created["owner_id"], "maker");

    let design_id = created["design_id"].as_str().unwrap();
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/designs/{}", design_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched["design_id"], created["design_id"]);
}

#[tokio::test]
async fn design_creation_requires_images_or_a_prompt() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .oneshot(post_json("/designs", json!({"owner_id": "maker"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn analyze_endpoint_advances_the_design() {
    let (app, state, _dir) = create_test_app().await;

    let record = state
        .orchestrator
        .create_design("maker".to_string(), vec!["img://chair".to_string()], None)
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/designs/{}/analyze", record.design_id),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["state"], "analyzed");
    assert!(json["analysis"]["recommended_method"].is_string());
}

#[tokio::test]
async fn download_endpoint_enforces_the_plan_limit() {
    let (app, state, _dir) = create_test_app().await;

    // Design ready for download
    let record = state
        .orchestrator
        .create_design("maker".to_string(), vec!["img://chair".to_string()], None)
        .await
        .unwrap();
    let design_id = record.design_id;
    state.orchestrator.advance_analyze(design_id).await.unwrap();
    state.orchestrator.advance_preview(design_id).await.unwrap();

    // Free plan at 9 of 10 STL downloads used
    for _ in 0..9 {
        assert!(state
            .orchestrator
            .gate()
            .authorize("maker", ResourceType::Stl)
            .await
            .unwrap()
            .allowed);
    }

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/designs/{}/files/stl", design_id),
            json!({"user_id": "maker"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-quota-remaining").unwrap(),
        "0"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(!bytes.is_empty());

    // The next request is over quota
    let response = app
        .oneshot(post_json(
            &format!("/designs/{}/files/stl", design_id),
            json!({"user_id": "maker"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "QUOTA_EXCEEDED");
}

#[tokio::test]
async fn unknown_file_formats_are_rejected() {
    let (app, state, _dir) = create_test_app().await;

    let record = state
        .orchestrator
        .create_design("maker".to_string(), vec!["img://chair".to_string()], None)
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/designs/{}/files/obj", record.design_id),
            json!({"user_id": "maker"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn entitlements_endpoint_reports_plan_and_usage() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/users/maker/entitlements")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["plan_type"], "free");
    assert_eq!(json["resources"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn plan_webhook_updates_the_subscription() {
    let (app, _state, _dir) = create_test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/users/maker/plan")
                .header("content-type", "application/json")
                .body(Body::from(json!({"plan_type": "pro"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["plan_type"], "pro");

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/users/maker/plan")
                .header("content-type", "application/json")
                .body(Body::from(json!({"plan_type": "platinum"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn preview_assets_push_rejects_empty_refs() {
    let (app, state, _dir) = create_test_app().await;

    let record = state
        .orchestrator
        .create_design("maker".to_string(), vec!["img://chair".to_string()], None)
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/designs/{}/preview/assets", record.design_id),
            json!({"model_refs": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
