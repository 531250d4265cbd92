//! Route definitions for the `/projects` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::project;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// GET    /                                   -> list
/// POST   /                                   -> create
/// GET    /{id}                               -> status
/// POST   /{id}/prompts                       -> generate_prompts
/// POST   /{id}/generate-all                  -> generate_all
/// POST   /{id}/stages/{stage}/run            -> run_stage
/// POST   /{id}/stages/{stage}/retry-failed   -> retry_failed
/// POST   /{id}/stages/{stage}/cancel         -> cancel
/// PUT    /{id}/stages/{stage}/items/{index}  -> override_item
/// ```
pub fn router() -> Router<AppState> {
    let stage_routes = Router::new()
        .route("/run", post(project::run_stage))
        .route("/retry-failed", post(project::retry_failed))
        .route("/cancel", post(project::cancel))
        .route("/items/{index}", put(project::override_item));

    Router::new()
        .route("/", get(project::list).post(project::create))
        .route("/{id}", get(project::status))
        .route("/{id}/prompts", post(project::generate_prompts))
        .route("/{id}/generate-all", post(project::generate_all))
        .nest("/{id}/stages/{stage}", stage_routes)
}
