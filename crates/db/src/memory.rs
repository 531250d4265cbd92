//! In-process store. State is lost when the process exits.
//!
//! Locks are held only for the duration of a single map operation, never
//! across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use shorts_core::checkpoint::{BatchCheckpoint, CheckpointItem};
use shorts_core::project::{Project, ProjectState, ProjectSummary};
use shorts_core::stage::Stage;
use shorts_core::store::{CheckpointStore, ProjectStore, StoreError};
use shorts_core::types::ProjectId;

#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectId, Project>>,
    checkpoints: Mutex<HashMap<(ProjectId, Stage), BatchCheckpoint>>,
    unavailable: AtomicBool,
    item_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful [`CheckpointStore::save_item`] calls so far.
    pub fn item_writes(&self) -> usize {
        self.item_writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }

    fn projects(&self) -> Result<MutexGuard<'_, HashMap<ProjectId, Project>>, StoreError> {
        self.check_available()?;
        self.projects
            .lock()
            .map_err(|_| StoreError::Unavailable("project map poisoned".into()))
    }

    fn checkpoints(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<(ProjectId, Stage), BatchCheckpoint>>, StoreError> {
        self.check_available()?;
        self.checkpoints
            .lock()
            .map_err(|_| StoreError::Unavailable("checkpoint map poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(
        &self,
        project_id: ProjectId,
        stage: Stage,
    ) -> Result<Option<BatchCheckpoint>, StoreError> {
        Ok(self.checkpoints()?.get(&(project_id, stage)).cloned())
    }

    async fn create(
        &self,
        project_id: ProjectId,
        stage: Stage,
        total: usize,
    ) -> Result<BatchCheckpoint, StoreError> {
        let mut map = self.checkpoints()?;
        Ok(map
            .entry((project_id, stage))
            .or_insert_with(|| BatchCheckpoint::new(project_id, stage, total))
            .clone())
    }

    async fn save_item(
        &self,
        project_id: ProjectId,
        stage: Stage,
        item: &CheckpointItem,
    ) -> Result<(), StoreError> {
        let mut map = self.checkpoints()?;
        let slot = map
            .get_mut(&(project_id, stage))
            .and_then(|cp| cp.item_mut(item.index))
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "checkpoint {project_id}/{stage} has no item {}",
                    item.index
                ))
            })?;
        *slot = item.clone();
        self.item_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self, checkpoint: &BatchCheckpoint) -> Result<(), StoreError> {
        let mut map = self.checkpoints()?;
        map.insert(
            (checkpoint.project_id, checkpoint.stage),
            checkpoint.clone(),
        );
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        self.projects()?.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: ProjectId) -> Result<Option<Project>, StoreError> {
        Ok(self.projects()?.get(&id).cloned())
    }

    async fn set_prompts(&self, id: ProjectId, prompts: &[String]) -> Result<bool, StoreError> {
        let mut map = self.projects()?;
        match map.get_mut(&id) {
            Some(project) if project.prompts.is_none() => {
                project.prompts = Some(prompts.to_vec());
                project.state = ProjectState::PromptsGenerated;
                project.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_state(&self, id: ProjectId, state: ProjectState) -> Result<(), StoreError> {
        if let Some(project) = self.projects()?.get_mut(&id) {
            project.state = state;
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>, StoreError> {
        let mut summaries: Vec<ProjectSummary> =
            self.projects()?.values().map(Project::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = MemoryStore::new();
        let id = ProjectId::now_v7();
        let mut first = store.create(id, Stage::Image, 10).await.unwrap();
        first.items[0].start().unwrap();
        store.save_item(id, Stage::Image, &first.items[0]).await.unwrap();

        let second = store.create(id, Stage::Image, 10).await.unwrap();
        assert_eq!(second.items[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn save_item_on_missing_checkpoint_is_corrupt() {
        let store = MemoryStore::new();
        let item = CheckpointItem::pending(0);
        assert_matches!(
            store.save_item(ProjectId::now_v7(), Stage::Video, &item).await,
            Err(StoreError::Corrupt(_))
        );
    }

    #[tokio::test]
    async fn unavailable_switch_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert_matches!(
            store.load(ProjectId::now_v7(), Stage::Image).await,
            Err(StoreError::Unavailable(_))
        );
        store.set_unavailable(false);
        assert!(store.load(ProjectId::now_v7(), Stage::Image).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_prompts_only_once() {
        let store = MemoryStore::new();
        let project = Project::new("a dog", "life").unwrap();
        store.insert_project(&project).await.unwrap();
        let prompts = vec!["p".to_string(); 10];
        assert!(store.set_prompts(project.id, &prompts).await.unwrap());
        assert!(!store.set_prompts(project.id, &prompts).await.unwrap());
    }
}
