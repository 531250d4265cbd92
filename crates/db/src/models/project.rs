//! `projects` table rows.

use shorts_core::project::{Project, ProjectState, ProjectSummary};
use shorts_core::store::StoreError;
use shorts_core::types::{ProjectId, Timestamp};
use sqlx::FromRow;

use super::corrupt;

/// A row from the `projects` table.
///
/// `prompts` holds a JSON array of strings once generated.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub description: String,
    pub content_type: String,
    pub prompts: Option<String>,
    pub state: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// The listing subset of a `projects` row.
#[derive(Debug, Clone, FromRow)]
pub struct ProjectSummaryRow {
    pub id: String,
    pub description: String,
    pub content_type: String,
    pub state: String,
    pub created_at: Timestamp,
}

fn parse_id(raw: &str) -> Result<ProjectId, StoreError> {
    raw.parse().map_err(|e| corrupt("projects.id", e))
}

fn parse_state(raw: &str) -> Result<ProjectState, StoreError> {
    raw.parse().map_err(|e| corrupt("projects.state", e))
}

impl TryFrom<ProjectRow> for Project {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        let prompts = row
            .prompts
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .map_err(|e| corrupt("projects.prompts", e))?;
        Ok(Project {
            id: parse_id(&row.id)?,
            description: row.description,
            content_type: row.content_type,
            prompts,
            state: parse_state(&row.state)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ProjectSummaryRow> for ProjectSummary {
    type Error = StoreError;

    fn try_from(row: ProjectSummaryRow) -> Result<Self, Self::Error> {
        Ok(ProjectSummary {
            id: parse_id(&row.id)?,
            description: row.description,
            content_type: row.content_type,
            state: parse_state(&row.state)?,
            created_at: row.created_at,
        })
    }
}
