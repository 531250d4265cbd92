//! Persistence traits for projects and batch checkpoints.
//!
//! Implementations live in `shorts-db`. Every method that writes must be
//! durable before it returns so the orchestrator can rely on the last
//! committed state after a crash.

use async_trait::async_trait;

use crate::checkpoint::{BatchCheckpoint, CheckpointItem};
use crate::project::{Project, ProjectState, ProjectSummary};
use crate::stage::Stage;
use crate::types::ProjectId;

/// Storage failure. Fatal to the current run, safe to resume later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded or violates its invariants.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Durable per-scene progress keyed by `(project_id, stage)`.
///
/// Writes for different items of the same checkpoint may happen in
/// parallel and must not overwrite each other.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(
        &self,
        project_id: ProjectId,
        stage: Stage,
    ) -> Result<Option<BatchCheckpoint>, StoreError>;

    /// Create a checkpoint with every item pending, or return the existing one.
    async fn create(
        &self,
        project_id: ProjectId,
        stage: Stage,
        total: usize,
    ) -> Result<BatchCheckpoint, StoreError>;

    /// Atomically replace a single item.
    async fn save_item(
        &self,
        project_id: ProjectId,
        stage: Stage,
        item: &CheckpointItem,
    ) -> Result<(), StoreError>;

    /// Persist every item of a checkpoint in one transaction.
    async fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError>;

    /// Set prompts if none are stored yet.
    ///
    /// Returns `false` when the project already had prompts or does not exist.
    async fn set_prompts(&self, id: ProjectId, prompts: &[String]) -> Result<bool, StoreError>;

    /// Update the cached lifecycle state.
    async fn set_state(&self, id: ProjectId, state: ProjectState) -> Result<(), StoreError>;

    /// All projects, newest first.
    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, StoreError>;
}
