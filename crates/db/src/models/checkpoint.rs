//! `batch_checkpoints` and `checkpoint_items` table rows.

use shorts_core::checkpoint::{BatchCheckpoint, CheckpointItem};
use shorts_core::store::StoreError;
use shorts_core::types::{ProjectId, Timestamp};
use sqlx::FromRow;

use super::corrupt;

/// Header row: one per (project, stage).
#[derive(Debug, Clone, FromRow)]
pub struct BatchCheckpointRow {
    pub project_id: String,
    pub stage: String,
    pub total: i64,
    pub created_at: Timestamp,
}

/// One scene of a checkpoint.
#[derive(Debug, Clone, FromRow)]
pub struct CheckpointItemRow {
    pub scene_index: i64,
    pub status: String,
    pub attempt_count: i64,
    pub artifact_ref: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: Timestamp,
}

impl TryFrom<CheckpointItemRow> for CheckpointItem {
    type Error = StoreError;

    fn try_from(row: CheckpointItemRow) -> Result<Self, Self::Error> {
        Ok(CheckpointItem {
            index: usize::try_from(row.scene_index)
                .map_err(|e| corrupt("checkpoint_items.scene_index", e))?,
            status: row
                .status
                .parse()
                .map_err(|e| corrupt("checkpoint_items.status", e))?,
            attempt_count: u32::try_from(row.attempt_count)
                .map_err(|e| corrupt("checkpoint_items.attempt_count", e))?,
            artifact_ref: row.artifact_ref,
            last_error: row.last_error,
            updated_at: row.updated_at,
        })
    }
}

/// Assemble a checkpoint from its header and item rows and check its
/// invariants.
pub fn assemble(
    header: BatchCheckpointRow,
    items: Vec<CheckpointItemRow>,
) -> Result<BatchCheckpoint, StoreError> {
    let project_id: ProjectId = header
        .project_id
        .parse()
        .map_err(|e| corrupt("batch_checkpoints.project_id", e))?;
    let checkpoint = BatchCheckpoint {
        project_id,
        stage: header
            .stage
            .parse()
            .map_err(|e| corrupt("batch_checkpoints.stage", e))?,
        total: usize::try_from(header.total)
            .map_err(|e| corrupt("batch_checkpoints.total", e))?,
        items: items
            .into_iter()
            .map(CheckpointItem::try_from)
            .collect::<Result<_, _>>()?,
        created_at: header.created_at,
    };
    checkpoint
        .validate()
        .map_err(|e| corrupt("checkpoint_items", e))?;
    Ok(checkpoint)
}
