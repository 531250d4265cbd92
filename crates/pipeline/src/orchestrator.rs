//! Batch orchestrator.
//!
//! Drives the scene-level generation calls of one or two stages for a
//! project through a worker pool of fixed width. Every item transition is
//! written to the [`CheckpointStore`] before the scheduler acts on it, so a
//! run interrupted at any point can be resumed by calling it again.
//!
//! Scheduling happens on the calling task. Workers and backoff timers are
//! spawned onto two `JoinSet`s; only workers count against the concurrency
//! limit, so an item waiting out its backoff does not hold a slot.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use shorts_core::checkpoint::{BatchCheckpoint, BatchResult, CheckpointItem, ItemStatus};
use shorts_core::generation::{
    AdapterError, GenerationAdapter, GenerationRequest, TransientKind,
};
use shorts_core::project::{can_transition, derive_state, Project, ProjectState};
use shorts_core::retry::{RetryDecision, RetryPolicy};
use shorts_core::stage::Stage;
use shorts_core::store::CheckpointStore;
use shorts_core::types::{ProjectId, SceneIndex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{EventBus, EventKind, PipelineEvent};
use crate::registry::RunRegistry;

/// Outcome of a combined image and video run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineResult {
    /// Image stage totals after the run.
    pub image: BatchResult,
    /// Video stage totals. Scenes whose image failed stay `pending` here.
    pub video: BatchResult,
}

/// Which items of a checkpoint a run schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunScope {
    /// Every item not yet `done`. Failed items are reset to pending.
    Remaining,
    /// Only `failed` items.
    FailedOnly,
}

impl RunScope {
    fn select(self, checkpoint: &BatchCheckpoint) -> Vec<SceneIndex> {
        match self {
            Self::Remaining => checkpoint.remaining_indices(),
            Self::FailedOnly => checkpoint.failed_indices(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs generation batches for projects, one run per `(project, stage)`.
///
/// Shared across requests behind an `Arc`. Each run owns its scheduler
/// state; the orchestrator itself only holds the adapter, the checkpoint
/// store, the event bus and the run registry.
pub struct BatchOrchestrator {
    /// Template for the per-attempt workers spawned by a run.
    worker: Worker,
    /// Active runs and their cancellation tokens.
    registry: Arc<RunRegistry>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        adapter: Arc<dyn GenerationAdapter>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            worker: Worker {
                store,
                adapter,
                events: Arc::new(EventBus::default()),
                retry: config.retry.clone(),
                timeout: config.adapter_timeout,
            },
            registry: Arc::new(RunRegistry::new()),
        }
    }

    /// Publish progress on `events` instead of a private bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.worker.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.worker.events
    }

    /// Run every scene of `stage` that is not yet `done`.
    ///
    /// Item failures are reported in the returned [`BatchResult`]; only
    /// precondition violations, a concurrent run, or storage failures
    /// produce an error.
    #[tracing::instrument(skip_all, fields(project_id = %project.id, stage = %stage))]
    pub async fn run_batch(
        &self,
        project: &Project,
        stage: Stage,
        limit: usize,
    ) -> Result<BatchResult, PipelineError> {
        let abort = CancellationToken::new();
        let mut results = self
            .execute(project, &[(stage, RunScope::Remaining)], limit, &abort)
            .await?;
        pop_result(&mut results, stage)
    }

    /// Re-run only the `failed` scenes of `stage`.
    #[tracing::instrument(skip_all, fields(project_id = %project.id, stage = %stage))]
    pub async fn retry_failed(
        &self,
        project: &Project,
        stage: Stage,
        limit: usize,
    ) -> Result<BatchResult, PipelineError> {
        let abort = CancellationToken::new();
        let mut results = self
            .execute(project, &[(stage, RunScope::FailedOnly)], limit, &abort)
            .await?;
        pop_result(&mut results, stage)
    }

    /// Run both stages in one pool. Video `i` starts as soon as image `i`
    /// is `done`.
    #[tracing::instrument(skip_all, fields(project_id = %project.id))]
    pub async fn run_pipeline(
        &self,
        project: &Project,
        limit: usize,
    ) -> Result<PipelineResult, PipelineError> {
        let abort = CancellationToken::new();
        let mut results = self
            .execute(project, &PIPELINE_PLAN, limit, &abort)
            .await?;
        Ok(PipelineResult {
            image: pop_result(&mut results, Stage::Image)?,
            video: pop_result(&mut results, Stage::Video)?,
        })
    }

    /// Ask the active run for `(project_id, stage)` to stop scheduling.
    ///
    /// In-flight calls finish; everything else stays `pending`.
    pub fn cancel(&self, project_id: ProjectId, stage: Stage) -> bool {
        let cancelled = self.registry.cancel(project_id, stage);
        if cancelled {
            tracing::info!(%project_id, %stage, "Batch cancellation requested");
        }
        cancelled
    }

    pub fn is_running(&self, project_id: ProjectId, stage: Stage) -> bool {
        self.registry.is_active(project_id, stage)
    }

    pub fn active_stages(&self, project_id: ProjectId) -> Vec<Stage> {
        self.registry.active_stages(project_id)
    }

    /// Replace one item under the run locks that cover it.
    ///
    /// `apply` receives the current item and returns its new value; it runs
    /// while the locks are held, so side effects such as writing an artifact
    /// cannot race a batch run. Editing an image also excludes video runs,
    /// which read images as first frames.
    pub async fn update_item<F, Fut>(
        &self,
        project: &Project,
        stage: Stage,
        index: SceneIndex,
        apply: F,
    ) -> Result<CheckpointItem, PipelineError>
    where
        F: FnOnce(CheckpointItem) -> Fut,
        Fut: Future<Output = Result<CheckpointItem, PipelineError>>,
    {
        let total = require_prompts(project)?.len();
        if index >= total {
            return Err(PipelineError::Validation(format!(
                "Scene index {index} out of range 0..{total}"
            )));
        }
        let _guard = self.registry.acquire(project.id, stages_reading(stage))?;
        let checkpoint = self.worker.store.create(project.id, stage, total).await?;
        let current = checkpoint
            .item(index)
            .cloned()
            .ok_or_else(|| PipelineError::Internal(format!("Checkpoint has no scene {index}")))?;
        let updated = apply(current).await?;
        self.worker.store.save_item(project.id, stage, &updated).await?;
        Ok(updated)
    }

    // -- Run setup ----------------------------------------------------------

    /// Run `plan` until it finishes or `abort` is cancelled.
    ///
    /// Cancelling `abort` behaves like [`cancel`](Self::cancel): in-flight
    /// calls drain and the rest stays `pending`.
    pub(crate) async fn execute(
        &self,
        project: &Project,
        plan: &[(Stage, RunScope)],
        limit: usize,
        abort: &CancellationToken,
    ) -> Result<Vec<BatchResult>, PipelineError> {
        if limit == 0 {
            return Err(PipelineError::Validation(
                "Concurrency limit must be at least 1".into(),
            ));
        }
        let prompts = require_prompts(project)?;
        let stages: Vec<Stage> = plan.iter().map(|(stage, _)| *stage).collect();
        let guard = self.registry.acquire_child(project.id, &stages, abort)?;

        let store = &self.worker.store;
        let mut image = store.load(project.id, Stage::Image).await?;
        let mut video = store.load(project.id, Stage::Video).await?;

        let mut scheduled: Vec<(Stage, Vec<SceneIndex>)> = Vec::with_capacity(plan.len());
        for &(stage, scope) in plan {
            let indices = match (stage_checkpoint(&image, &video, stage), scope) {
                (Some(checkpoint), scope) => scope.select(checkpoint),
                (None, RunScope::Remaining) => (0..prompts.len()).collect(),
                (None, RunScope::FailedOnly) => {
                    return Err(PipelineError::Precondition(format!(
                        "No {stage} batch has run for this project"
                    )));
                }
            };
            scheduled.push((stage, indices));
        }

        let Some(&(first, _)) = scheduled.iter().find(|(_, indices)| !indices.is_empty()) else {
            tracing::info!("Nothing to schedule, returning recorded result");
            return stages
                .iter()
                .map(|&stage| {
                    stage_checkpoint(&image, &video, stage)
                        .map(|checkpoint| BatchResult::from_checkpoint(checkpoint, false))
                        .ok_or_else(|| PipelineError::Internal(format!("Missing {stage} checkpoint")))
                })
                .collect();
        };
        check_can_start(first, image.as_ref(), video.as_ref())?;

        for (stage, indices) in &scheduled {
            let slot = match stage {
                Stage::Image => &mut image,
                Stage::Video => &mut video,
            };
            let checkpoint = match slot.take() {
                Some(checkpoint) => checkpoint,
                None => store.create(project.id, *stage, prompts.len()).await?,
            };
            *slot = Some(self.prepare(checkpoint, indices).await?);
        }

        let mut run = Run {
            project_id: project.id,
            prompts: prompts.to_vec(),
            stages,
            image,
            video,
            ready: VecDeque::new(),
            waiting: BTreeSet::new(),
            attempts: HashMap::new(),
        };
        for (stage, indices) in scheduled {
            for index in indices {
                run.enqueue(stage, index);
            }
        }

        self.drive(run, guard.token(), limit).await
    }

    /// Recover interrupted items and reset failed ones about to be retried.
    async fn prepare(
        &self,
        mut checkpoint: BatchCheckpoint,
        scheduled: &[SceneIndex],
    ) -> Result<BatchCheckpoint, PipelineError> {
        let recovered = checkpoint.recover_interrupted();
        if !recovered.is_empty() {
            tracing::warn!(
                stage = %checkpoint.stage,
                indices = ?recovered,
                "Recovered items left in progress by an interrupted run",
            );
        }
        let mut reset = false;
        for &index in scheduled {
            if let Some(item) = checkpoint.item_mut(index) {
                if item.status == ItemStatus::Failed {
                    item.reset_failed()?;
                    reset = true;
                }
            }
        }
        if reset || !recovered.is_empty() {
            self.worker.store.save(&checkpoint).await?;
        }
        Ok(checkpoint)
    }

    // -- Scheduler ----------------------------------------------------------

    async fn drive(
        &self,
        mut run: Run,
        cancel: &CancellationToken,
        limit: usize,
    ) -> Result<Vec<BatchResult>, PipelineError> {
        let mut workers: JoinSet<Result<Finished, PipelineError>> = JoinSet::new();
        let mut timers: JoinSet<Task> = JoinSet::new();
        let mut cancelled = false;

        self.worker.publish(
            run.project_id,
            EventKind::RunStarted {
                stages: run.stages.clone(),
                scheduled: run.ready.len() + run.waiting.len(),
                concurrency: limit,
            },
        );
        tracing::info!(
            scheduled = run.ready.len() + run.waiting.len(),
            concurrency = limit,
            "Batch run started",
        );

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                timers.abort_all();
                tracing::info!(in_flight = workers.len(), "Batch run cancelled, draining in-flight calls");
            }
            while !cancelled && workers.len() < limit {
                let Some(task) = run.ready.pop_front() else { break };
                let attempt = {
                    let count = run.attempts.entry((task.stage, task.index)).or_insert(0);
                    *count += 1;
                    *count
                };
                let job = run.job(task, attempt)?;
                workers.spawn(self.worker.clone().run(job));
            }
            if workers.is_empty() && (cancelled || timers.is_empty()) {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    timers.abort_all();
                    tracing::info!(in_flight = workers.len(), "Batch run cancelled, draining in-flight calls");
                }
                Some(joined) = workers.join_next() => {
                    let finished = match joined {
                        Ok(Ok(finished)) => finished,
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "Batch run aborted");
                            return Err(e);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Worker task failed");
                            return Err(PipelineError::Internal(format!("Worker task failed: {e}")));
                        }
                    };
                    if let Some((task, delay)) = run.record(finished) {
                        timers.spawn(async move {
                            tokio::time::sleep(delay).await;
                            task
                        });
                    }
                }
                Some(joined) = timers.join_next(), if !cancelled => {
                    match joined {
                        Ok(task) => run.ready.push_back(task),
                        Err(e) => {
                            return Err(PipelineError::Internal(format!("Backoff timer failed: {e}")));
                        }
                    }
                }
                else => break,
            }
        }

        let mut results = Vec::with_capacity(run.stages.len());
        for &stage in &run.stages {
            let checkpoint = stage_checkpoint(&run.image, &run.video, stage)
                .ok_or_else(|| PipelineError::Internal(format!("Missing {stage} checkpoint")))?;
            let result = BatchResult::from_checkpoint(checkpoint, cancelled);
            tracing::info!(
                %stage,
                done = result.done,
                failed = result.failed,
                pending = result.pending,
                cancelled,
                "Batch run finished",
            );
            self.worker
                .publish(run.project_id, EventKind::BatchFinished { result: result.clone() });
            results.push(result);
        }
        Ok(results)
    }
}

/// Both stages, images first.
pub(crate) const PIPELINE_PLAN: [(Stage, RunScope); 2] =
    [(Stage::Image, RunScope::Remaining), (Stage::Video, RunScope::Remaining)];

/// Stages whose runs read the artifacts of `stage`.
fn stages_reading(stage: Stage) -> &'static [Stage] {
    match stage {
        Stage::Image => &[Stage::Image, Stage::Video],
        Stage::Video => &[Stage::Video],
    }
}

fn require_prompts(project: &Project) -> Result<&[String], PipelineError> {
    project
        .prompts
        .as_deref()
        .ok_or_else(|| PipelineError::Precondition("Project has no prompts yet".into()))
}

fn stage_checkpoint<'a>(
    image: &'a Option<BatchCheckpoint>,
    video: &'a Option<BatchCheckpoint>,
    stage: Stage,
) -> Option<&'a BatchCheckpoint> {
    match stage {
        Stage::Image => image.as_ref(),
        Stage::Video => video.as_ref(),
    }
}

/// The lifecycle must allow entering the running state of `stage`.
fn check_can_start(
    stage: Stage,
    image: Option<&BatchCheckpoint>,
    video: Option<&BatchCheckpoint>,
) -> Result<(), PipelineError> {
    if stage == Stage::Video && !image.is_some_and(BatchCheckpoint::is_complete) {
        let done = image.map_or(0, |cp| cp.count(ItemStatus::Done));
        let total = image.map_or(0, |cp| cp.total);
        return Err(PipelineError::Precondition(format!(
            "Every image must be done before videos can run ({done}/{total} done)"
        )));
    }
    let current = derive_state(true, image, video, &[]);
    let target = ProjectState::running(stage);
    if !can_transition(current, target) {
        return Err(PipelineError::Precondition(format!(
            "Cannot start {stage} batch from state {current}"
        )));
    }
    Ok(())
}

pub(crate) fn pop_result(results: &mut Vec<BatchResult>, stage: Stage) -> Result<BatchResult, PipelineError> {
    let position = results
        .iter()
        .position(|r| r.stage == stage)
        .ok_or_else(|| PipelineError::Internal(format!("No result for {stage}")))?;
    Ok(results.remove(position))
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Task {
    stage: Stage,
    index: SceneIndex,
    dependency: Option<String>,
}

/// Working set of one batch run, owned by the scheduler.
struct Run {
    project_id: ProjectId,
    prompts: Vec<String>,
    stages: Vec<Stage>,
    image: Option<BatchCheckpoint>,
    video: Option<BatchCheckpoint>,
    ready: VecDeque<Task>,
    /// Video scenes whose image is not `done` yet.
    waiting: BTreeSet<SceneIndex>,
    /// Attempts made in this run, per item. Drives the retry policy.
    attempts: HashMap<(Stage, SceneIndex), u32>,
}

impl Run {
    fn enqueue(&mut self, stage: Stage, index: SceneIndex) {
        match stage {
            Stage::Image => self.ready.push_back(Task { stage, index, dependency: None }),
            Stage::Video => match self.image_ref(index) {
                Some(dependency) => self.ready.push_back(Task {
                    stage,
                    index,
                    dependency: Some(dependency),
                }),
                None => {
                    self.waiting.insert(index);
                }
            },
        }
    }

    fn image_ref(&self, index: SceneIndex) -> Option<String> {
        self.image.as_ref()?.artifact_ref(index).map(str::to_string)
    }

    fn checkpoint_mut(&mut self, stage: Stage) -> Option<&mut BatchCheckpoint> {
        match stage {
            Stage::Image => self.image.as_mut(),
            Stage::Video => self.video.as_mut(),
        }
    }

    fn job(&self, task: Task, run_attempt: u32) -> Result<Job, PipelineError> {
        let prompt = self
            .prompts
            .get(task.index)
            .cloned()
            .ok_or_else(|| PipelineError::Internal(format!("No prompt for scene {}", task.index)))?;
        let item = stage_checkpoint(&self.image, &self.video, task.stage)
            .and_then(|cp| cp.item(task.index))
            .cloned()
            .ok_or_else(|| {
                PipelineError::Internal(format!("No {} item for scene {}", task.stage, task.index))
            })?;
        Ok(Job {
            request: GenerationRequest {
                project_id: self.project_id,
                stage: task.stage,
                scene_index: task.index,
                prompt,
                dependency: task.dependency,
            },
            item,
            run_attempt,
        })
    }

    /// Fold a finished attempt into the working set.
    ///
    /// Returns the backoff delay when the item must be retried.
    fn record(&mut self, finished: Finished) -> Option<(Task, Duration)> {
        let Finished { request, item, outcome } = finished;
        let (stage, index) = (request.stage, request.scene_index);
        if let Some(slot) = self.checkpoint_mut(stage).and_then(|cp| cp.item_mut(index)) {
            *slot = item;
        }
        match outcome {
            Outcome::Done if stage == Stage::Image => {
                if self.waiting.remove(&index) {
                    self.enqueue(Stage::Video, index);
                }
                None
            }
            Outcome::Done | Outcome::Failed => None,
            Outcome::Retry(delay) => Some((
                Task {
                    stage,
                    index,
                    dependency: request.dependency,
                },
                delay,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One adapter call for one item.
struct Job {
    request: GenerationRequest,
    item: CheckpointItem,
    run_attempt: u32,
}

enum Outcome {
    Done,
    Retry(Duration),
    Failed,
}

struct Finished {
    request: GenerationRequest,
    item: CheckpointItem,
    outcome: Outcome,
}

/// Everything a spawned attempt needs, cheap to clone.
#[derive(Clone)]
struct Worker {
    store: Arc<dyn CheckpointStore>,
    adapter: Arc<dyn GenerationAdapter>,
    events: Arc<EventBus>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Worker {
    fn publish(&self, project_id: ProjectId, kind: EventKind) {
        self.events.publish(PipelineEvent::new(project_id, kind));
    }

    async fn save(&self, request: &GenerationRequest, item: &CheckpointItem) -> Result<(), PipelineError> {
        self.store
            .save_item(request.project_id, request.stage, item)
            .await
            .map_err(PipelineError::from)
    }

    async fn call_adapter(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        match tokio::time::timeout(self.timeout, self.adapter.submit(request)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::transient(
                TransientKind::Timeout,
                format!("No response within {}s", self.timeout.as_secs_f64()),
            )),
        }
    }

    async fn run(self, job: Job) -> Result<Finished, PipelineError> {
        let Job { request, mut item, run_attempt } = job;
        let (project_id, stage, index) = (request.project_id, request.stage, request.scene_index);

        item.start()?;
        self.save(&request, &item).await?;
        self.publish(
            project_id,
            EventKind::ItemStarted { stage, index, attempt: item.attempt_count },
        );
        tracing::debug!(%project_id, %stage, index, attempt = item.attempt_count, "Generation started");

        let outcome = match self.call_adapter(&request).await {
            Ok(artifact_ref) => {
                item.complete(artifact_ref.clone())?;
                self.save(&request, &item).await?;
                tracing::info!(%project_id, %stage, index, artifact_ref = %artifact_ref, "Scene generated");
                self.publish(project_id, EventKind::ItemDone { stage, index, artifact_ref });
                Outcome::Done
            }
            Err(error) => match self.retry.should_retry(run_attempt, &error) {
                RetryDecision::RetryAfter(delay) => {
                    item.requeue(error.to_string())?;
                    self.save(&request, &item).await?;
                    tracing::warn!(
                        %project_id,
                        %stage,
                        index,
                        attempt = run_attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Generation failed, retrying",
                    );
                    self.publish(
                        project_id,
                        EventKind::ItemRetrying {
                            stage,
                            index,
                            attempt: item.attempt_count,
                            delay_ms: delay.as_millis() as u64,
                            error: error.to_string(),
                        },
                    );
                    Outcome::Retry(delay)
                }
                RetryDecision::GiveUp => {
                    item.fail(error.to_string())?;
                    self.save(&request, &item).await?;
                    tracing::error!(%project_id, %stage, index, error = %error, "Generation failed");
                    self.publish(
                        project_id,
                        EventKind::ItemFailed { stage, index, error: error.to_string() },
                    );
                    Outcome::Failed
                }
            },
        };

        Ok(Finished { request, item, outcome })
    }
}
