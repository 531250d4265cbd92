//! Batch orchestrator behaviour against the in-memory store and the
//! placeholder adapter. Time is paused so backoff and latency are instant.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use shorts_core::checkpoint::{BatchCheckpoint, ItemStatus};
use shorts_core::generation::{AdapterError, PermanentKind, TransientKind};
use shorts_core::project::{Project, SCENE_COUNT};
use shorts_core::retry::RetryPolicy;
use shorts_core::stage::Stage;
use shorts_core::store::{CheckpointStore, StoreError};
use shorts_db::MemoryStore;
use shorts_pipeline::events::EventKind;
use shorts_pipeline::{BatchOrchestrator, PipelineConfig, PipelineError};
use shorts_providers::placeholder::CallEvent;
use shorts_providers::PlaceholderAdapter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    adapter: Arc<PlaceholderAdapter>,
    orchestrator: Arc<BatchOrchestrator>,
    project: Project,
}

fn config(max_retries: u32) -> PipelineConfig {
    PipelineConfig {
        concurrency: 3,
        retry: RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        },
        adapter_timeout: Duration::from_secs(30),
    }
}

fn project() -> Project {
    let mut project = Project::new("A corgi cooking pasta", "cooking").unwrap();
    project.prompts = Some((0..SCENE_COUNT).map(|i| format!("scene {i}")).collect());
    project
}

fn harness_with(adapter: PlaceholderAdapter, config: PipelineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let adapter = Arc::new(adapter.with_latency(Duration::from_millis(100)));
    let orchestrator = Arc::new(BatchOrchestrator::new(
        store.clone(),
        adapter.clone(),
        &config,
    ));
    Harness {
        store,
        adapter,
        orchestrator,
        project: project(),
    }
}

fn harness(adapter: PlaceholderAdapter) -> Harness {
    harness_with(adapter, config(3))
}

fn transient() -> AdapterError {
    AdapterError::transient(TransientKind::Server, "upstream returned 502")
}

impl Harness {
    async fn checkpoint(&self, stage: Stage) -> BatchCheckpoint {
        self.store.load(self.project.id, stage).await.unwrap().unwrap()
    }

    /// Mark `indices` done without calling the adapter.
    async fn premark_done(&self, stage: Stage, indices: &[usize]) {
        let checkpoint = self
            .store
            .create(self.project.id, stage, SCENE_COUNT)
            .await
            .unwrap();
        for &index in indices {
            let mut item = checkpoint.items[index].clone();
            item.start().unwrap();
            item.complete(format!("earlier/{stage}/scene_{index}")).unwrap();
            self.store.save_item(self.project.id, stage, &item).await.unwrap();
        }
    }

    async fn wait_for_calls(&self, calls: u32) {
        while self.adapter.total_calls() < calls {
            tokio::task::yield_now().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn full_run_completes_every_scene() {
    let h = harness(PlaceholderAdapter::new());

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!((result.done, result.failed, result.pending), (SCENE_COUNT, 0, 0));
    assert!(result.is_success());
    assert!(!result.cancelled);
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32);

    let checkpoint = h.checkpoint(Stage::Image).await;
    assert!(checkpoint.is_complete());
    assert!(checkpoint.items.iter().all(|i| i.attempt_count == 1));
    assert_eq!(
        checkpoint.artifact_ref(2),
        Some(format!("placeholder/{}/images/scene_2", h.project.id).as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_concurrency_limit() {
    for limit in [1, 3, 4, SCENE_COUNT] {
        let h = harness(PlaceholderAdapter::new());
        h.orchestrator.run_batch(&h.project, Stage::Image, limit).await.unwrap();
        assert_eq!(h.adapter.max_in_flight(), limit, "limit {limit}");
    }
}

#[tokio::test(start_paused = true)]
async fn rerun_after_success_makes_no_calls() {
    let h = harness(PlaceholderAdapter::new());
    let first = h.orchestrator.run_batch(&h.project, Stage::Image, 5).await.unwrap();
    let second = h.orchestrator.run_batch(&h.project, Stage::Image, 5).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32);
}

// ---------------------------------------------------------------------------
// Resume
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resume_skips_done_scenes() {
    let h = harness(PlaceholderAdapter::new());
    h.premark_done(Stage::Image, &[0, 1, 2, 3]).await;

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!(result.done, SCENE_COUNT);
    for index in 0..4 {
        assert_eq!(h.adapter.calls_for(Stage::Image, index), 0);
    }
    for index in 4..SCENE_COUNT {
        assert_eq!(h.adapter.calls_for(Stage::Image, index), 1);
    }
    assert_eq!(
        h.checkpoint(Stage::Image).await.artifact_ref(0),
        Some("earlier/image/scene_0")
    );
}

#[tokio::test(start_paused = true)]
async fn in_progress_leftovers_are_rerun() {
    let h = harness(PlaceholderAdapter::new());
    let checkpoint = h.store.create(h.project.id, Stage::Image, SCENE_COUNT).await.unwrap();
    let mut item = checkpoint.items[6].clone();
    item.start().unwrap();
    h.store.save_item(h.project.id, Stage::Image, &item).await.unwrap();

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!(result.done, SCENE_COUNT);
    assert_eq!(h.adapter.calls_for(Stage::Image, 6), 1);
    assert_eq!(h.checkpoint(Stage::Image).await.items[6].attempt_count, 2);
}

// ---------------------------------------------------------------------------
// Retries and failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_until_success() {
    let h = harness(PlaceholderAdapter::new().fail_times(Stage::Image, 4, 2, transient()));
    let mut events = h.orchestrator.events().subscribe();

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!((result.done, result.failed), (SCENE_COUNT, 0));
    let checkpoint = h.checkpoint(Stage::Image).await;
    assert_eq!(checkpoint.items[4].attempt_count, 3);
    assert_eq!(checkpoint.items[4].status, ItemStatus::Done);
    assert_eq!(h.adapter.calls_for(Stage::Image, 4), 3);

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if let EventKind::ItemRetrying { index, .. } = event.kind {
            assert_eq!(index, 4);
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn always_transient_item_gives_up_after_max_retries() {
    let h = harness(PlaceholderAdapter::new().fail_always(Stage::Image, 2, transient()));

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!(result.failed_indices, vec![2]);
    assert_eq!(result.done, SCENE_COUNT - 1);
    assert_eq!(h.adapter.calls_for(Stage::Image, 2), 4);

    let item = &h.checkpoint(Stage::Image).await.items[2];
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(item.artifact_ref.is_none());
    assert!(item.last_error.as_deref().unwrap().contains("502"));
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_blocks_videos_until_retried() {
    let h = harness(PlaceholderAdapter::new().fail_always(
        Stage::Image,
        7,
        AdapterError::permanent(PermanentKind::ContentRejected, "sensitive content"),
    ));

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();
    assert_eq!((result.done, result.failed), (9, 1));
    assert_eq!(result.failed_indices, vec![7]);
    assert_eq!(h.adapter.calls_for(Stage::Image, 7), 1);

    assert_matches!(
        h.orchestrator.run_batch(&h.project, Stage::Video, 3).await,
        Err(PipelineError::Precondition(_))
    );

    h.adapter.heal(Stage::Image, 7);
    let retried = h.orchestrator.retry_failed(&h.project, Stage::Image, 3).await.unwrap();
    assert!(retried.is_success());
    assert_eq!(h.adapter.calls_for(Stage::Image, 7), 2);
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32 + 1);

    let videos = h.orchestrator.run_batch(&h.project, Stage::Video, 3).await.unwrap();
    assert!(videos.is_success());
}

#[tokio::test(start_paused = true)]
async fn retry_failed_leaves_pending_scenes_alone() {
    let h = harness(PlaceholderAdapter::new());
    h.store.create(h.project.id, Stage::Image, SCENE_COUNT).await.unwrap();
    let mut item = h.checkpoint(Stage::Image).await.items[1].clone();
    item.start().unwrap();
    item.fail("bad prompt").unwrap();
    h.store.save_item(h.project.id, Stage::Image, &item).await.unwrap();

    let result = h.orchestrator.retry_failed(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!(h.adapter.total_calls(), 1);
    assert_eq!((result.done, result.failed, result.pending), (1, 0, SCENE_COUNT - 1));
}

#[tokio::test(start_paused = true)]
async fn hung_call_times_out_as_transient() {
    let mut config = config(1);
    config.adapter_timeout = Duration::from_secs(5);
    let h = harness_with(PlaceholderAdapter::new().hang_on(Stage::Image, 5), config);

    let result = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();

    assert_eq!(result.failed_indices, vec![5]);
    assert_eq!(h.adapter.calls_for(Stage::Image, 5), 2);
    let item = &h.checkpoint(Stage::Image).await.items[5];
    assert!(item.last_error.as_deref().unwrap().contains("timeout"));
}

// ---------------------------------------------------------------------------
// Exclusion, cancellation, storage failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_run_for_same_stage_is_rejected() {
    let h = harness(PlaceholderAdapter::new());
    let first = {
        let orchestrator = h.orchestrator.clone();
        let project = h.project.clone();
        tokio::spawn(async move { orchestrator.run_batch(&project, Stage::Image, 2).await })
    };
    h.wait_for_calls(1).await;

    assert_matches!(
        h.orchestrator.run_batch(&h.project, Stage::Image, 2).await,
        Err(PipelineError::BatchAlreadyRunning { stage: Stage::Image, .. })
    );

    let result = first.await.unwrap().unwrap();
    assert!(result.is_success());
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32);
    let checkpoint = h.checkpoint(Stage::Image).await;
    assert!(checkpoint.items.iter().all(|i| i.attempt_count == 1));
    assert!(!h.orchestrator.is_running(h.project.id, Stage::Image));
}

#[tokio::test(start_paused = true)]
async fn cancellation_drains_in_flight_and_keeps_rest_pending() {
    let h = harness(PlaceholderAdapter::new());
    let run = {
        let orchestrator = h.orchestrator.clone();
        let project = h.project.clone();
        tokio::spawn(async move { orchestrator.run_batch(&project, Stage::Image, 2).await })
    };
    h.wait_for_calls(2).await;
    assert!(h.orchestrator.cancel(h.project.id, Stage::Image));

    let result = run.await.unwrap().unwrap();
    assert!(result.cancelled);
    assert_eq!((result.done, result.failed, result.pending), (2, 0, SCENE_COUNT - 2));
    assert_eq!(h.adapter.total_calls(), 2);
    assert_eq!(h.checkpoint(Stage::Image).await.count(ItemStatus::Pending), SCENE_COUNT - 2);

    let resumed = h.orchestrator.run_batch(&h.project, Stage::Image, 2).await.unwrap();
    assert!(resumed.is_success());
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32);
}

#[tokio::test(start_paused = true)]
async fn storage_outage_aborts_run_and_resume_recovers() {
    let h = harness(PlaceholderAdapter::new());
    let run = {
        let orchestrator = h.orchestrator.clone();
        let project = h.project.clone();
        tokio::spawn(async move { orchestrator.run_batch(&project, Stage::Image, 3).await })
    };
    h.wait_for_calls(3).await;
    h.store.set_unavailable(true);

    assert_matches!(
        run.await.unwrap(),
        Err(PipelineError::Checkpoint(StoreError::Unavailable(_)))
    );
    assert!(!h.orchestrator.is_running(h.project.id, Stage::Image));

    h.store.set_unavailable(false);
    let checkpoint = h.checkpoint(Stage::Image).await;
    assert_eq!(checkpoint.count(ItemStatus::InProgress), 3);

    let resumed = h.orchestrator.run_batch(&h.project, Stage::Image, 3).await.unwrap();
    assert!(resumed.is_success());
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejects_invalid_runs() {
    let h = harness(PlaceholderAdapter::new());

    assert_matches!(
        h.orchestrator.run_batch(&h.project, Stage::Image, 0).await,
        Err(PipelineError::Validation(_))
    );
    assert_matches!(
        h.orchestrator.retry_failed(&h.project, Stage::Image, 3).await,
        Err(PipelineError::Precondition(_))
    );
    assert_matches!(
        h.orchestrator.run_batch(&h.project, Stage::Video, 3).await,
        Err(PipelineError::Precondition(_))
    );

    let mut bare = h.project.clone();
    bare.prompts = None;
    assert_matches!(
        h.orchestrator.run_batch(&bare, Stage::Image, 3).await,
        Err(PipelineError::Precondition(_))
    );
    assert_eq!(h.adapter.total_calls(), 0);
}

// ---------------------------------------------------------------------------
// Combined pipeline
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn pipeline_starts_each_video_after_its_image() {
    let h = harness(PlaceholderAdapter::new());

    let result = h.orchestrator.run_pipeline(&h.project, 4).await.unwrap();

    assert!(result.image.is_success());
    assert!(result.video.is_success());
    assert!(h.adapter.max_in_flight() <= 4);

    let log = h.adapter.dispatch_log();
    for (position, event) in log.iter().enumerate() {
        if let CallEvent::Started { stage: Stage::Video, index, dependency } = event {
            let image_done = log[..position].iter().any(|e| {
                matches!(e, CallEvent::Finished { stage: Stage::Image, index: i, ok: true } if i == index)
            });
            assert!(image_done, "video {index} started before its image");
            assert_eq!(
                dependency.as_deref(),
                Some(format!("placeholder/{}/images/scene_{index}", h.project.id).as_str())
            );
        }
    }

    let first_video = log
        .iter()
        .position(|e| matches!(e, CallEvent::Started { stage: Stage::Video, .. }))
        .unwrap();
    let last_image = log
        .iter()
        .rposition(|e| matches!(e, CallEvent::Finished { stage: Stage::Image, .. }))
        .unwrap();
    assert!(first_video < last_image, "videos waited for every image");
}

#[tokio::test(start_paused = true)]
async fn pipeline_leaves_video_pending_when_image_fails() {
    let h = harness(PlaceholderAdapter::new().fail_always(
        Stage::Image,
        3,
        AdapterError::permanent(PermanentKind::ContentRejected, "rejected"),
    ));

    let result = h.orchestrator.run_pipeline(&h.project, 4).await.unwrap();

    assert_eq!(result.image.failed_indices, vec![3]);
    assert_eq!((result.video.done, result.video.pending), (SCENE_COUNT - 1, 1));
    assert_eq!(h.adapter.calls_for(Stage::Video, 3), 0);
    assert_eq!(h.checkpoint(Stage::Video).await.items[3].status, ItemStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn pipeline_resumes_videos_only() {
    let h = harness(PlaceholderAdapter::new());
    h.premark_done(Stage::Image, &(0..SCENE_COUNT).collect::<Vec<_>>()).await;

    let result = h.orchestrator.run_pipeline(&h.project, 4).await.unwrap();

    assert!(result.video.is_success());
    assert_eq!(h.adapter.total_calls(), SCENE_COUNT as u32);
    assert_eq!(
        h.checkpoint(Stage::Video).await.artifact_ref(0),
        Some(format!("placeholder/{}/videos/scene_0", h.project.id).as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn pipeline_holds_both_stage_locks() {
    let h = harness(PlaceholderAdapter::new());
    let run = {
        let orchestrator = h.orchestrator.clone();
        let project = h.project.clone();
        tokio::spawn(async move { orchestrator.run_pipeline(&project, 2).await })
    };
    h.wait_for_calls(1).await;

    assert_eq!(
        h.orchestrator.active_stages(h.project.id),
        vec![Stage::Image, Stage::Video]
    );
    assert_matches!(
        h.orchestrator.run_batch(&h.project, Stage::Video, 2).await,
        Err(PipelineError::BatchAlreadyRunning { stage: Stage::Video, .. })
    );
    run.await.unwrap().unwrap();
}
