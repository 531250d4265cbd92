use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shorts_pipeline::PipelineError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PipelineError`] for domain failures and adds HTTP-specific
/// variants. Every error renders as `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Pipeline(err) => classify(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify(err: &PipelineError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", message),
        PipelineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
        PipelineError::Precondition(_) => (StatusCode::CONFLICT, "PRECONDITION_FAILED", message),
        PipelineError::BatchAlreadyRunning { .. } => {
            (StatusCode::CONFLICT, "BATCH_ALREADY_RUNNING", message)
        }
        PipelineError::UnsupportedContentType(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "UNSUPPORTED_CONTENT_TYPE",
            message,
        ),
        PipelineError::PromptGeneration(_) => {
            (StatusCode::BAD_GATEWAY, "PROMPT_GENERATION_FAILED", message)
        }
        PipelineError::Checkpoint(e) => {
            tracing::error!(error = %e, "Checkpoint storage error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORAGE_UNAVAILABLE",
                "Storage is unavailable, retry later".to_string(),
            )
        }
        PipelineError::Artifact(_) | PipelineError::Internal(_) => {
            tracing::error!(error = %err, "Internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
