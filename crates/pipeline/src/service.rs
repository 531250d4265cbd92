//! Project-level operations exposed to the API layer.
//!
//! [`ProjectService`] ties the project store, prompt strategies, the batch
//! orchestrator and the artifact store together. The lifecycle state stored
//! on a project is a cache: it is recomputed from the checkpoints after each
//! run and whenever status is read.

use std::sync::Arc;

use serde::Serialize;
use shorts_core::checkpoint::{BatchCheckpoint, BatchResult, CheckpointItem};
use shorts_core::project::{derive_state, Project, ProjectState, ProjectSummary};
use shorts_core::prompts::PromptRegistry;
use shorts_core::stage::Stage;
use shorts_core::store::{CheckpointStore, ProjectStore};
use shorts_core::types::{ProjectId, SceneIndex};
use shorts_providers::artifacts::ArtifactError;
use shorts_providers::ArtifactStore;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::orchestrator::{pop_result, BatchOrchestrator, PipelineResult, RunScope, PIPELINE_PLAN};

/// A project with its per-item progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    /// The project, with `state` derived from the checkpoints and active runs.
    #[serde(flatten)]
    pub project: Project,
    /// Image checkpoint, absent until the first image run.
    pub image: Option<BatchCheckpoint>,
    /// Video checkpoint, absent until the first video run.
    pub video: Option<BatchCheckpoint>,
    /// Stages with a run in progress right now.
    pub active_stages: Vec<Stage>,
}

/// Entry point for every project operation.
///
/// Batch runs are spawned onto their own task. Dropping the future of a run
/// method (a client disconnect, a request timeout) cancels the run the same
/// way [`cancel_run`](Self::cancel_run) does: in-flight calls finish and are
/// recorded, the remaining scenes stay `pending`.
pub struct ProjectService {
    projects: Arc<dyn ProjectStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    prompts: Arc<PromptRegistry>,
    orchestrator: Arc<BatchOrchestrator>,
    artifacts: Arc<ArtifactStore>,
    default_concurrency: usize,
}

impl ProjectService {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        prompts: Arc<PromptRegistry>,
        orchestrator: Arc<BatchOrchestrator>,
        artifacts: Arc<ArtifactStore>,
        default_concurrency: usize,
    ) -> Self {
        Self {
            projects,
            checkpoints,
            prompts,
            orchestrator,
            artifacts,
            default_concurrency,
        }
    }

    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    // -- Projects -----------------------------------------------------------

    pub async fn create_project(
        &self,
        description: &str,
        content_type: &str,
    ) -> Result<Project, PipelineError> {
        let project = Project::new(description, content_type)?;
        if !self.prompts.contains(&project.content_type) {
            return Err(PipelineError::UnsupportedContentType(project.content_type));
        }
        self.projects.insert_project(&project).await?;
        tracing::info!(project_id = %project.id, content_type = %project.content_type, "Project created");
        Ok(project)
    }

    /// Produce the scene prompts. Prompts are set once; a second call fails.
    pub async fn generate_prompts(&self, id: ProjectId) -> Result<Project, PipelineError> {
        let project = self.project(id).await?;
        if project.has_prompts() {
            return Err(PipelineError::Precondition(
                "Prompts have already been generated".into(),
            ));
        }
        let prompts = self
            .prompts
            .generate(&project.description, &project.content_type)
            .await
            .inspect_err(|e| tracing::warn!(project_id = %id, error = %e, "Prompt generation failed"))?;
        if !self.projects.set_prompts(id, &prompts).await? {
            return Err(PipelineError::Precondition(
                "Prompts have already been generated".into(),
            ));
        }
        tracing::info!(project_id = %id, count = prompts.len(), "Prompts generated");
        self.project(id).await
    }

    pub async fn get_project_status(&self, id: ProjectId) -> Result<ProjectStatus, PipelineError> {
        let mut project = self.project(id).await?;
        let image = self.checkpoints.load(id, Stage::Image).await?;
        let video = self.checkpoints.load(id, Stage::Video).await?;
        let active_stages = self.orchestrator.active_stages(id);
        project.state = derive_state(
            project.has_prompts(),
            image.as_ref(),
            video.as_ref(),
            &active_stages,
        );
        Ok(ProjectStatus {
            project,
            image,
            video,
            active_stages,
        })
    }

    /// Summaries, newest first, with active runs reflected in the state.
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, PipelineError> {
        let mut summaries = self.projects.list_projects().await?;
        for summary in &mut summaries {
            if let Some(&stage) = self.orchestrator.active_stages(summary.id).first() {
                summary.state = ProjectState::running(stage);
            }
        }
        Ok(summaries)
    }

    // -- Batch runs ---------------------------------------------------------

    /// Run every scene of `stage` that is not yet `done`.
    pub async fn run_batch(
        &self,
        id: ProjectId,
        stage: Stage,
        concurrency: Option<usize>,
    ) -> Result<BatchResult, PipelineError> {
        let mut results = self
            .spawn_run(id, vec![(stage, RunScope::Remaining)], concurrency)
            .await?;
        pop_result(&mut results, stage)
    }

    /// Re-run only the `failed` scenes of `stage`.
    pub async fn retry_failed(
        &self,
        id: ProjectId,
        stage: Stage,
        concurrency: Option<usize>,
    ) -> Result<BatchResult, PipelineError> {
        let mut results = self
            .spawn_run(id, vec![(stage, RunScope::FailedOnly)], concurrency)
            .await?;
        pop_result(&mut results, stage)
    }

    /// Run images and videos together, each video following its image.
    pub async fn run_pipeline(
        &self,
        id: ProjectId,
        concurrency: Option<usize>,
    ) -> Result<PipelineResult, PipelineError> {
        let mut results = self
            .spawn_run(id, PIPELINE_PLAN.to_vec(), concurrency)
            .await?;
        Ok(PipelineResult {
            image: pop_result(&mut results, Stage::Image)?,
            video: pop_result(&mut results, Stage::Video)?,
        })
    }

    pub async fn cancel_run(&self, id: ProjectId, stage: Stage) -> Result<(), PipelineError> {
        self.project(id).await?;
        if self.orchestrator.cancel(id, stage) {
            Ok(())
        } else {
            Err(PipelineError::Precondition(format!("No {stage} batch is running")))
        }
    }

    /// Store operator-supplied bytes for one scene and mark it `done`.
    ///
    /// The artifact is written under the run lock, and only after the item
    /// is known to accept the override, so a rejected override leaves the
    /// files on disk untouched.
    pub async fn override_item(
        &self,
        id: ProjectId,
        stage: Stage,
        index: SceneIndex,
        bytes: &[u8],
        extension: &str,
    ) -> Result<CheckpointItem, PipelineError> {
        let project = self.project(id).await?;
        if bytes.is_empty() {
            return Err(PipelineError::Validation("Artifact body is empty".into()));
        }

        let artifacts = &self.artifacts;
        let item = self
            .orchestrator
            .update_item(&project, stage, index, |mut item| async move {
                item.override_done(ArtifactStore::artifact_ref(id, stage, index, extension))?;
                artifacts
                    .write(id, stage, index, extension, bytes)
                    .await
                    .map_err(|e| match e {
                        ArtifactError::InvalidExtension(_) => PipelineError::Validation(e.to_string()),
                        other => PipelineError::Artifact(other.to_string()),
                    })?;
                Ok::<_, PipelineError>(item)
            })
            .await?;
        tracing::info!(project_id = %id, %stage, index, "Scene overridden manually");
        self.settle(id).await;
        Ok(item)
    }

    /// Recompute the lifecycle state from checkpoints and cache it.
    pub async fn refresh_state(&self, id: ProjectId) -> Result<ProjectState, PipelineError> {
        refresh_state(self.projects.as_ref(), self.checkpoints.as_ref(), id).await
    }

    // -- Helpers ------------------------------------------------------------

    async fn project(&self, id: ProjectId) -> Result<Project, PipelineError> {
        self.projects
            .get_project(id)
            .await?
            .ok_or(PipelineError::NotFound(id))
    }

    /// Execute `plan` on its own task and wait for it.
    ///
    /// The task outlives this future. If the caller goes away, the drop
    /// guard cancels the run and the task still drains in-flight calls and
    /// refreshes the cached state.
    async fn spawn_run(
        &self,
        id: ProjectId,
        plan: Vec<(Stage, RunScope)>,
        concurrency: Option<usize>,
    ) -> Result<Vec<BatchResult>, PipelineError> {
        let project = self.project(id).await?;
        let limit = concurrency.unwrap_or(self.default_concurrency);
        let abort = CancellationToken::new();
        let _cancel_on_drop = abort.clone().drop_guard();

        let orchestrator = Arc::clone(&self.orchestrator);
        let projects = Arc::clone(&self.projects);
        let checkpoints = Arc::clone(&self.checkpoints);
        let run = tokio::spawn(async move {
            let result = orchestrator.execute(&project, &plan, limit, &abort).await;
            settle(projects.as_ref(), checkpoints.as_ref(), id).await;
            result
        });
        run.await
            .map_err(|e| PipelineError::Internal(format!("Batch task failed: {e}")))?
    }

    async fn settle(&self, id: ProjectId) {
        settle(self.projects.as_ref(), self.checkpoints.as_ref(), id).await;
    }
}

async fn refresh_state(
    projects: &dyn ProjectStore,
    checkpoints: &dyn CheckpointStore,
    id: ProjectId,
) -> Result<ProjectState, PipelineError> {
    let project = projects.get_project(id).await?.ok_or(PipelineError::NotFound(id))?;
    let image = checkpoints.load(id, Stage::Image).await?;
    let video = checkpoints.load(id, Stage::Video).await?;
    let state = derive_state(project.has_prompts(), image.as_ref(), video.as_ref(), &[]);
    if state != project.state {
        projects.set_state(id, state).await?;
        tracing::info!(project_id = %id, from = %project.state, to = %state, "Project state changed");
    }
    Ok(state)
}

/// Refresh the cached state after a run or edit, whatever its outcome.
async fn settle(projects: &dyn ProjectStore, checkpoints: &dyn CheckpointStore, id: ProjectId) {
    if let Err(e) = refresh_state(projects, checkpoints, id).await {
        tracing::warn!(project_id = %id, error = %e, "Failed to refresh project state");
    }
}
