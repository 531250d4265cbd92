mod common;

use axum::http::StatusCode;

#[tokio::test]
async fn health_reports_database() {
    let app = common::build_test_app().await;
    let response = common::get(&app.router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_healthy"], true);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = common::build_test_app().await;
    let response = common::get(&app.router, "/api/v1/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
