//! Progress events published while batches run.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel. Publishing never
//! blocks and never fails a run; with no subscribers events are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shorts_core::checkpoint::BatchResult;
use shorts_core::stage::Stage;
use shorts_core::types::{ProjectId, SceneIndex};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        stages: Vec<Stage>,
        scheduled: usize,
        concurrency: usize,
    },
    ItemStarted {
        stage: Stage,
        index: SceneIndex,
        attempt: u32,
    },
    ItemDone {
        stage: Stage,
        index: SceneIndex,
        artifact_ref: String,
    },
    ItemRetrying {
        stage: Stage,
        index: SceneIndex,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    ItemFailed {
        stage: Stage,
        index: SceneIndex,
        error: String,
    },
    BatchFinished {
        result: BatchResult,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub project_id: ProjectId,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(project_id: ProjectId, kind: EventKind) -> Self {
        Self {
            project_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out of [`PipelineEvent`]s.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// When the buffer is full, slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: PipelineEvent) {
        // SendError only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every event at debug level until the bus is dropped.
pub async fn log_events(mut rx: broadcast::Receiver<PipelineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                tracing::debug!(project_id = %event.project_id, event = ?event.kind, "Pipeline event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Pipeline event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
