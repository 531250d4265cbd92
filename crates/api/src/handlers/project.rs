//! Handlers for the `/projects` resource.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use shorts_core::checkpoint::{BatchResult, CheckpointItem};
use shorts_core::project::{Project, ProjectSummary};
use shorts_core::stage::Stage;
use shorts_core::types::{ProjectId, SceneIndex};
use shorts_pipeline::{PipelineResult, ProjectStatus};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProject {
    pub description: String,
    pub content_type: String,
}

/// Optional worker pool width for run endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RunParams {
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OverrideParams {
    /// File extension; derived from `Content-Type` when absent.
    pub ext: Option<String>,
}

fn parse_stage(raw: &str) -> AppResult<Stage> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown stage '{raw}'")))
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim();
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        _ => None,
    }
}

/// POST /api/v1/projects
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateProject>,
) -> AppResult<(StatusCode, Json<DataResponse<Project>>)> {
    let project = state
        .service
        .create_project(&input.description, &input.content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: project })))
}

/// GET /api/v1/projects
pub async fn list(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<ProjectSummary>>>> {
    let projects = state.service.list_projects().await?;
    Ok(Json(DataResponse { data: projects }))
}

/// GET /api/v1/projects/{id}
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> AppResult<Json<DataResponse<ProjectStatus>>> {
    let status = state.service.get_project_status(id).await?;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/projects/{id}/prompts
pub async fn generate_prompts(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
) -> AppResult<Json<DataResponse<Project>>> {
    let project = state.service.generate_prompts(id).await?;
    Ok(Json(DataResponse { data: project }))
}

/// POST /api/v1/projects/{id}/stages/{stage}/run
pub async fn run_stage(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
    Query(params): Query<RunParams>,
) -> AppResult<Json<DataResponse<BatchResult>>> {
    let stage = parse_stage(&stage)?;
    let result = state.service.run_batch(id, stage, params.concurrency).await?;
    Ok(Json(DataResponse { data: result }))
}

/// POST /api/v1/projects/{id}/stages/{stage}/retry-failed
pub async fn retry_failed(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
    Query(params): Query<RunParams>,
) -> AppResult<Json<DataResponse<BatchResult>>> {
    let stage = parse_stage(&stage)?;
    let result = state
        .service
        .retry_failed(id, stage, params.concurrency)
        .await?;
    Ok(Json(DataResponse { data: result }))
}

/// POST /api/v1/projects/{id}/stages/{stage}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path((id, stage)): Path<(ProjectId, String)>,
) -> AppResult<StatusCode> {
    let stage = parse_stage(&stage)?;
    state.service.cancel_run(id, stage).await?;
    Ok(StatusCode::ACCEPTED)
}

/// PUT /api/v1/projects/{id}/stages/{stage}/items/{index}
///
/// The raw request body becomes the scene's artifact.
pub async fn override_item(
    State(state): State<AppState>,
    Path((id, stage, index)): Path<(ProjectId, String, SceneIndex)>,
    Query(params): Query<OverrideParams>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<DataResponse<CheckpointItem>>> {
    let stage = parse_stage(&stage)?;
    let extension = match params.ext {
        Some(ext) => ext,
        None => headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for)
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::BadRequest(
                    "Set a supported Content-Type or pass ?ext= for the artifact".into(),
                )
            })?,
    };
    let item = state
        .service
        .override_item(id, stage, index, &body, &extension)
        .await?;
    Ok(Json(DataResponse { data: item }))
}

/// POST /api/v1/projects/{id}/generate-all
pub async fn generate_all(
    State(state): State<AppState>,
    Path(id): Path<ProjectId>,
    Query(params): Query<RunParams>,
) -> AppResult<Json<DataResponse<PipelineResult>>> {
    let result = state.service.run_pipeline(id, params.concurrency).await?;
    Ok(Json(DataResponse { data: result }))
}
