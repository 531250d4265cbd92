//! Shared helpers for API integration tests.
//!
//! Every test builds the real router over a throwaway SQLite file and
//! artifact directory, then drives it with `oneshot` requests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use shorts_api::config::ServerConfig;
use shorts_api::router::build_app_router;
use shorts_api::state::AppState;
use shorts_core::prompts::PromptRegistry;
use shorts_db::SqliteStore;
use shorts_pipeline::{BatchOrchestrator, PipelineConfig, ProjectService};
use shorts_providers::{ArtifactStore, PlaceholderAdapter};
use tempfile::TempDir;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub adapter: Arc<PlaceholderAdapter>,
    pub artifact_dir: PathBuf,
    _dir: TempDir,
}

pub async fn build_test_app() -> TestApp {
    build_test_app_with(PlaceholderAdapter::new()).await
}

pub async fn build_test_app_with(adapter: PlaceholderAdapter) -> TestApp {
    let dir = TempDir::new().unwrap();
    let database_url = format!("sqlite://{}", dir.path().join("shorts.db").display());
    let artifact_dir = dir.path().join("artifacts");
    std::fs::create_dir_all(&artifact_dir).unwrap();

    let config = ServerConfig::from_lookup(|key| match key {
        "DATABASE_URL" => Some(database_url.clone()),
        "ARTIFACT_DIR" => Some(artifact_dir.display().to_string()),
        _ => None,
    })
    .unwrap();

    let pool = shorts_db::create_pool(&config.database_url, 4).await.unwrap();
    shorts_db::run_migrations(&pool).await.unwrap();
    let store = Arc::new(SqliteStore::new(pool.clone()));

    let adapter = Arc::new(adapter);
    let pipeline = PipelineConfig::default();
    let orchestrator = Arc::new(BatchOrchestrator::new(store.clone(), adapter.clone(), &pipeline));
    let service = ProjectService::new(
        store.clone(),
        store,
        Arc::new(PromptRegistry::with_templates()),
        orchestrator,
        Arc::new(ArtifactStore::new(&config.artifact_dir)),
        pipeline.concurrency,
    );

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        service: Arc::new(service),
    };

    TestApp {
        router: build_app_router(state, &config),
        adapter,
        artifact_dir,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_empty(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn put_bytes(
    app: &Router,
    uri: &str,
    content_type: Option<&str>,
    bytes: &'static [u8],
) -> Response<Body> {
    let mut builder = Request::builder().method(Method::PUT).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    send(app, builder.body(Body::from(bytes)).unwrap()).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Assert the status and return the decoded JSON body.
pub async fn expect_json(response: Response<Body>, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    body_json(response).await
}

/// Create a project and generate its prompts, returning the project id.
pub async fn create_project_with_prompts(app: &Router) -> String {
    let created = expect_json(
        post_json(
            app,
            "/api/v1/projects",
            serde_json::json!({ "description": "Grandma making dumplings", "content_type": "cooking" }),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let response = post_empty(app, &format!("/api/v1/projects/{id}/prompts")).await;
    assert_eq!(response.status(), StatusCode::OK);
    id
}
