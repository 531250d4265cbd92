//! Repository for the `batch_checkpoints` and `checkpoint_items` tables.
//!
//! Items are updated row by row, so writers for different scenes of the
//! same checkpoint never touch the same row.

use shorts_core::checkpoint::CheckpointItem;
use shorts_core::stage::Stage;
use shorts_core::types::ProjectId;
use sqlx::{SqliteConnection, SqlitePool};

use crate::models::checkpoint::{BatchCheckpointRow, CheckpointItemRow};

/// Column list for `checkpoint_items` queries.
const ITEM_COLUMNS: &str =
    "scene_index, status, attempt_count, artifact_ref, last_error, updated_at";

pub struct CheckpointRepo;

impl CheckpointRepo {
    pub async fn find_header(
        pool: &SqlitePool,
        project_id: ProjectId,
        stage: Stage,
    ) -> Result<Option<BatchCheckpointRow>, sqlx::Error> {
        sqlx::query_as::<_, BatchCheckpointRow>(
            "SELECT project_id, stage, total, created_at FROM batch_checkpoints
             WHERE project_id = ? AND stage = ?",
        )
        .bind(project_id.to_string())
        .bind(stage.as_str())
        .fetch_optional(pool)
        .await
    }

    /// All items of a checkpoint ordered by scene index.
    pub async fn list_items(
        pool: &SqlitePool,
        project_id: ProjectId,
        stage: Stage,
    ) -> Result<Vec<CheckpointItemRow>, sqlx::Error> {
        let query = format!(
            "SELECT {ITEM_COLUMNS} FROM checkpoint_items
             WHERE project_id = ? AND stage = ? ORDER BY scene_index ASC"
        );
        sqlx::query_as::<_, CheckpointItemRow>(&query)
            .bind(project_id.to_string())
            .bind(stage.as_str())
            .fetch_all(pool)
            .await
    }

    /// Insert a header and `total` pending items unless they already exist.
    pub async fn create_if_absent(
        pool: &SqlitePool,
        project_id: ProjectId,
        stage: Stage,
        total: usize,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now();
        let mut tx = pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO batch_checkpoints (project_id, stage, total, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(project_id.to_string())
        .bind(stage.as_str())
        .bind(total as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 1 {
            for index in 0..total {
                sqlx::query(
                    "INSERT INTO checkpoint_items
                         (project_id, stage, scene_index, status, attempt_count, updated_at)
                     VALUES (?, ?, ?, 'pending', 0, ?)",
                )
                .bind(project_id.to_string())
                .bind(stage.as_str())
                .bind(index as i64)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await
    }

    /// Overwrite one item row. Returns the number of rows updated.
    pub async fn update_item(
        conn: &mut SqliteConnection,
        project_id: ProjectId,
        stage: Stage,
        item: &CheckpointItem,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE checkpoint_items SET
                 status = ?, attempt_count = ?, artifact_ref = ?, last_error = ?, updated_at = ?
             WHERE project_id = ? AND stage = ? AND scene_index = ?",
        )
        .bind(item.status.as_str())
        .bind(i64::from(item.attempt_count))
        .bind(&item.artifact_ref)
        .bind(&item.last_error)
        .bind(item.updated_at)
        .bind(project_id.to_string())
        .bind(stage.as_str())
        .bind(item.index as i64)
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }
}
