//! SQLite-backed implementation of the store traits.

use async_trait::async_trait;
use shorts_core::checkpoint::{BatchCheckpoint, CheckpointItem};
use shorts_core::project::{Project, ProjectState, ProjectSummary};
use shorts_core::stage::Stage;
use shorts_core::store::{CheckpointStore, ProjectStore, StoreError};
use shorts_core::types::ProjectId;

use crate::models::checkpoint::assemble;
use crate::repositories::{CheckpointRepo, ProjectRepo};
use crate::DbPool;

/// Durable store over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::RowNotFound => {
            StoreError::Corrupt(e.to_string())
        }
        other => StoreError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn load(
        &self,
        project_id: ProjectId,
        stage: Stage,
    ) -> Result<Option<BatchCheckpoint>, StoreError> {
        let Some(header) = CheckpointRepo::find_header(&self.pool, project_id, stage)
            .await
            .map_err(map_sqlx)?
        else {
            return Ok(None);
        };
        let items = CheckpointRepo::list_items(&self.pool, project_id, stage)
            .await
            .map_err(map_sqlx)?;
        assemble(header, items).map(Some)
    }

    async fn create(
        &self,
        project_id: ProjectId,
        stage: Stage,
        total: usize,
    ) -> Result<BatchCheckpoint, StoreError> {
        CheckpointRepo::create_if_absent(&self.pool, project_id, stage, total)
            .await
            .map_err(map_sqlx)?;
        self.load(project_id, stage).await?.ok_or_else(|| {
            StoreError::Corrupt(format!("checkpoint {project_id}/{stage} vanished after create"))
        })
    }

    async fn save_item(
        &self,
        project_id: ProjectId,
        stage: Stage,
        item: &CheckpointItem,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        let updated = CheckpointRepo::update_item(&mut conn, project_id, stage, item)
            .await
            .map_err(map_sqlx)?;
        if updated == 0 {
            return Err(StoreError::Corrupt(format!(
                "checkpoint {project_id}/{stage} has no item {}",
                item.index
            )));
        }
        Ok(())
    }

    async fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for item in &checkpoint.items {
            let updated =
                CheckpointRepo::update_item(&mut tx, checkpoint.project_id, checkpoint.stage, item)
                    .await
                    .map_err(map_sqlx)?;
            if updated == 0 {
                return Err(StoreError::Corrupt(format!(
                    "checkpoint {}/{} has no item {}",
                    checkpoint.project_id, checkpoint.stage, item.index
                )));
            }
        }
        tx.commit().await.map_err(map_sqlx)
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        ProjectRepo::insert(&self.pool, project)
            .await
            .map_err(map_sqlx)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        ProjectRepo::find_by_id(&self.pool, id)
            .await
            .map_err(map_sqlx)?
            .map(Project::try_from)
            .transpose()
    }

    async fn set_prompts(&self, id: ProjectId, prompts: &[String]) -> Result<bool, StoreError> {
        let json = serde_json::Value::from(prompts.to_vec()).to_string();
        let updated = ProjectRepo::set_prompts(&self.pool, id, &json)
            .await
            .map_err(map_sqlx)?;
        Ok(updated == 1)
    }

    async fn set_state(&self, id: ProjectId, state: ProjectState) -> Result<(), StoreError> {
        ProjectRepo::set_state(&self.pool, id, state)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, StoreError> {
        ProjectRepo::list(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(ProjectSummary::try_from)
            .collect()
    }
}
