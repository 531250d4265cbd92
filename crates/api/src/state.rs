use std::sync::Arc;

use shorts_pipeline::ProjectService;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// SQLite pool backing projects and checkpoints. Used by `/health`.
    pub pool: shorts_db::DbPool,
    pub config: Arc<ServerConfig>,
    pub service: Arc<ProjectService>,
}
