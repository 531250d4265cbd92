//! Integration tests for the `/api/v1/projects` routes.
//!
//! Covers:
//! - Project creation and validation errors
//! - Prompt generation and its one-shot rule
//! - Stage runs, retries and the combined pipeline run
//! - Manual scene overrides and artifact serving
//! - Error envelopes for missing projects and failed preconditions

mod common;

use axum::http::StatusCode;
use serde_json::json;
use shorts_core::generation::{AdapterError, PermanentKind};
use shorts_core::stage::Stage;
use shorts_providers::PlaceholderAdapter;

use common::{body_bytes, expect_json, get, post_empty, post_json, put_bytes};

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_fetch_project() {
    let app = common::build_test_app().await;
    let created = expect_json(
        post_json(
            &app.router,
            "/api/v1/projects",
            json!({ "description": "Sunrise hike", "content_type": "travel" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_eq!(created["data"]["state"], "CREATED");
    let id = created["data"]["id"].as_str().unwrap();

    let status = expect_json(
        get(&app.router, &format!("/api/v1/projects/{id}")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(status["data"]["description"], "Sunrise hike");
    assert!(status["data"]["image"].is_null());
    assert_eq!(status["data"]["active_stages"], json!([]));

    let listed = expect_json(get(&app.router, "/api/v1/projects").await, StatusCode::OK).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_bad_input() {
    let app = common::build_test_app().await;

    let body = expect_json(
        post_json(
            &app.router,
            "/api/v1/projects",
            json!({ "description": "A story", "content_type": "opera" }),
        )
        .await,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(body["code"], "UNSUPPORTED_CONTENT_TYPE");

    let body = expect_json(
        post_json(
            &app.router,
            "/api/v1/projects",
            json!({ "description": "  ", "content_type": "life" }),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn missing_project_is_404() {
    let app = common::build_test_app().await;
    let id = uuid::Uuid::now_v7();
    let body = expect_json(
        get(&app.router, &format!("/api/v1/projects/{id}")).await,
        StatusCode::NOT_FOUND,
    )
    .await;
    assert_eq!(body["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompts_are_generated_once() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let status = expect_json(
        get(&app.router, &format!("/api/v1/projects/{id}")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(status["data"]["prompts"].as_array().unwrap().len(), 10);
    assert_eq!(status["data"]["state"], "PROMPTS_GENERATED");

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/prompts")).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["code"], "PRECONDITION_FAILED");
}

#[tokio::test]
async fn run_without_prompts_is_conflict() {
    let app = common::build_test_app().await;
    let created = expect_json(
        post_json(
            &app.router,
            "/api/v1/projects",
            json!({ "description": "Morning routine", "content_type": "life" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap();

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/image/run")).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["code"], "PRECONDITION_FAILED");
    assert_eq!(app.adapter.total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_then_video_completes_project() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(
            &app.router,
            &format!("/api/v1/projects/{id}/stages/images/run?concurrency=3"),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["done"], 10);
    assert_eq!(body["data"]["failed"], 0);
    assert!(app.adapter.max_in_flight() <= 3);

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/video/run")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["done"], 10);

    let status = expect_json(
        get(&app.router, &format!("/api/v1/projects/{id}")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(status["data"]["state"], "COMPLETE");
    assert_eq!(status["data"]["video"]["items"][9]["status"], "done");
}

#[tokio::test]
async fn video_before_images_is_conflict() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/video/run")).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["code"], "PRECONDITION_FAILED");
}

#[tokio::test]
async fn unknown_stage_and_bad_concurrency_are_rejected() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/audio/run")).await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "BAD_REQUEST");

    let body = expect_json(
        post_empty(
            &app.router,
            &format!("/api/v1/projects/{id}/stages/image/run?concurrency=0"),
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn generate_all_runs_both_stages() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/generate-all?concurrency=4")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["image"]["done"], 10);
    assert_eq!(body["data"]["video"]["done"], 10);
    assert_eq!(app.adapter.total_calls(), 20);
}

#[tokio::test]
async fn failed_scene_is_repaired_by_override() {
    let app = common::build_test_app_with(PlaceholderAdapter::new().fail_always(
        Stage::Image,
        7,
        AdapterError::permanent(PermanentKind::ContentRejected, "rejected"),
    ))
    .await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/image/run")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["failed_indices"], json!([7]));

    // Retrying hits the same permanent error.
    let body = expect_json(
        post_empty(
            &app.router,
            &format!("/api/v1/projects/{id}/stages/image/retry-failed"),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["failed"], 1);
    assert_eq!(app.adapter.calls_for(Stage::Image, 7), 2);

    let body = expect_json(
        put_bytes(
            &app.router,
            &format!("/api/v1/projects/{id}/stages/image/items/7"),
            Some("image/png"),
            b"hand-made png",
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["status"], "done");
    let reference = body["data"]["artifact_ref"].as_str().unwrap().to_string();
    assert_eq!(reference, format!("{id}/images/scene_7.png"));
    assert!(app.artifact_dir.join(&reference).exists());

    let served = get(&app.router, &format!("/artifacts/{reference}")).await;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(body_bytes(served).await, b"hand-made png");

    let status = expect_json(
        get(&app.router, &format!("/api/v1/projects/{id}")).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(status["data"]["state"], "IMAGES_DONE");
}

#[tokio::test]
async fn override_rejects_bad_requests() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;
    let uri = format!("/api/v1/projects/{id}/stages/image/items/0");

    let body = expect_json(
        put_bytes(&app.router, &uri, Some("text/plain"), b"hello").await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "BAD_REQUEST");

    let body = expect_json(
        put_bytes(&app.router, &uri, Some("image/png"), b"").await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let body = expect_json(
        put_bytes(
            &app.router,
            &format!("/api/v1/projects/{id}/stages/image/items/10?ext=png"),
            None,
            b"png",
        )
        .await,
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn cancel_without_active_run_is_conflict() {
    let app = common::build_test_app().await;
    let id = common::create_project_with_prompts(&app.router).await;

    let body = expect_json(
        post_empty(&app.router, &format!("/api/v1/projects/{id}/stages/image/cancel")).await,
        StatusCode::CONFLICT,
    )
    .await;
    assert_eq!(body["code"], "PRECONDITION_FAILED");
}
