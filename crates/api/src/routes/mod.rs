pub mod health;
pub mod project;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /projects                                       list, create
/// /projects/{id}                                  status
/// /projects/{id}/prompts                          generate prompts (POST)
/// /projects/{id}/generate-all                     image + video run (POST)
/// /projects/{id}/stages/{stage}/run               run batch (POST)
/// /projects/{id}/stages/{stage}/retry-failed      retry failed scenes (POST)
/// /projects/{id}/stages/{stage}/cancel            cancel active run (POST)
/// /projects/{id}/stages/{stage}/items/{index}     override scene (PUT, raw body)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/projects", project::router())
}
