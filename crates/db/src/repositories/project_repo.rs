//! Repository for the `projects` table.

use shorts_core::project::{Project, ProjectState};
use shorts_core::types::ProjectId;
use sqlx::SqlitePool;

use crate::models::project::{ProjectRow, ProjectSummaryRow};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, description, content_type, prompts, state, created_at, updated_at";

/// Provides CRUD operations for projects.
pub struct ProjectRepo;

impl ProjectRepo {
    pub async fn insert(pool: &SqlitePool, project: &Project) -> Result<(), sqlx::Error> {
        let prompts = project
            .prompts
            .as_ref()
            .map(|p| serde_json::Value::from(p.clone()).to_string());
        sqlx::query(
            "INSERT INTO projects (id, description, content_type, prompts, state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project.id.to_string())
        .bind(&project.description)
        .bind(&project.content_type)
        .bind(prompts)
        .bind(project.state.as_str())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: ProjectId,
    ) -> Result<Option<ProjectRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM projects WHERE id = ?");
        sqlx::query_as::<_, ProjectRow>(&query)
            .bind(id.to_string())
            .fetch_optional(pool)
            .await
    }

    /// Store prompts only if the project has none yet.
    ///
    /// Returns the number of rows updated (0 or 1).
    pub async fn set_prompts(
        pool: &SqlitePool,
        id: ProjectId,
        prompts_json: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE projects SET prompts = ?, state = ?, updated_at = ?
             WHERE id = ? AND prompts IS NULL",
        )
        .bind(prompts_json)
        .bind(ProjectState::PromptsGenerated.as_str())
        .bind(chrono::Utc::now())
        .bind(id.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_state(
        pool: &SqlitePool,
        id: ProjectId,
        state: ProjectState,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE projects SET state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(chrono::Utc::now())
            .bind(id.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List all projects, most recently created first.
    pub async fn list(pool: &SqlitePool) -> Result<Vec<ProjectSummaryRow>, sqlx::Error> {
        sqlx::query_as::<_, ProjectSummaryRow>(
            "SELECT id, description, content_type, state, created_at FROM projects
             ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(pool)
        .await
    }
}
