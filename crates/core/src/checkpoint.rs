//! Batch checkpoint data types and per-item state transitions.
//!
//! A [`BatchCheckpoint`] records the progress of one stage for one project:
//! exactly one [`CheckpointItem`] per scene index. It is the sole source of
//! truth for resuming a batch run.
//!
//! ```text
//! pending -> in_progress -> done
//!                        -> pending   (retry)
//!                        -> failed
//! failed  -> pending                  (explicit retry request)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stage::Stage;
use crate::types::{ProjectId, SceneIndex, Timestamp};

// ---------------------------------------------------------------------------
// Item status
// ---------------------------------------------------------------------------

/// Status of a single scene within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `done` and `failed` do not change without an explicit retry request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown item status '{other}'"
            ))),
        }
    }
}

/// Whether an item may move from `from` to `to` during normal scheduling.
pub fn can_transition(from: ItemStatus, to: ItemStatus) -> bool {
    use ItemStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, Done)
            | (InProgress, Pending)
            | (InProgress, Failed)
            | (Failed, Pending)
    )
}

fn check_transition(index: SceneIndex, from: ItemStatus, to: ItemStatus) -> Result<(), CoreError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::Precondition(format!(
            "Scene {index}: invalid transition {from} -> {to}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Checkpoint item
// ---------------------------------------------------------------------------

/// Durable progress record for one scene of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointItem {
    pub index: SceneIndex,
    pub status: ItemStatus,
    /// Attempts made for this scene across all runs. Never decreases.
    pub attempt_count: u32,
    /// Present iff `status == Done`.
    pub artifact_ref: Option<String>,
    /// Error from the most recent failed attempt.
    pub last_error: Option<String>,
    pub updated_at: Timestamp,
}

impl CheckpointItem {
    pub fn pending(index: SceneIndex) -> Self {
        Self {
            index,
            status: ItemStatus::Pending,
            attempt_count: 0,
            artifact_ref: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// `pending -> in_progress`, counting a new attempt.
    pub fn start(&mut self) -> Result<(), CoreError> {
        check_transition(self.index, self.status, ItemStatus::InProgress)?;
        self.status = ItemStatus::InProgress;
        self.attempt_count += 1;
        self.touch();
        Ok(())
    }

    /// `in_progress -> done`, recording the produced artifact.
    pub fn complete(&mut self, artifact_ref: String) -> Result<(), CoreError> {
        check_transition(self.index, self.status, ItemStatus::Done)?;
        self.status = ItemStatus::Done;
        self.artifact_ref = Some(artifact_ref);
        self.last_error = None;
        self.touch();
        Ok(())
    }

    /// `in_progress -> pending` after a retryable failure.
    pub fn requeue(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        check_transition(self.index, self.status, ItemStatus::Pending)?;
        self.status = ItemStatus::Pending;
        self.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// `in_progress -> failed`, keeping the terminating error.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        check_transition(self.index, self.status, ItemStatus::Failed)?;
        self.status = ItemStatus::Failed;
        self.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// `failed -> pending` on an explicit retry request.
    pub fn reset_failed(&mut self) -> Result<(), CoreError> {
        check_transition(self.index, self.status, ItemStatus::Pending)?;
        self.status = ItemStatus::Pending;
        self.touch();
        Ok(())
    }

    /// Revert an `in_progress` item left behind by an interrupted run.
    ///
    /// Returns `true` if the item changed.
    pub fn recover(&mut self) -> bool {
        if self.status == ItemStatus::InProgress {
            self.status = ItemStatus::Pending;
            self.touch();
            true
        } else {
            false
        }
    }

    /// Mark the item `done` with an operator-supplied artifact.
    ///
    /// Allowed from any status except `in_progress`; the attempt count is
    /// left unchanged because no generation call was made.
    pub fn override_done(&mut self, artifact_ref: String) -> Result<(), CoreError> {
        if self.status == ItemStatus::InProgress {
            return Err(CoreError::Precondition(format!(
                "Scene {}: cannot override while generation is in progress",
                self.index
            )));
        }
        self.status = ItemStatus::Done;
        self.artifact_ref = Some(artifact_ref);
        self.last_error = None;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Batch checkpoint
// ---------------------------------------------------------------------------

/// Per-scene completion state for one (project, stage) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub project_id: ProjectId,
    pub stage: Stage,
    pub total: usize,
    /// One entry per scene, `items[i].index == i`.
    pub items: Vec<CheckpointItem>,
    pub created_at: Timestamp,
}

impl BatchCheckpoint {
    /// A fresh checkpoint with every scene pending.
    pub fn new(project_id: ProjectId, stage: Stage, total: usize) -> Self {
        Self {
            project_id,
            stage,
            total,
            items: (0..total).map(CheckpointItem::pending).collect(),
            created_at: Utc::now(),
        }
    }

    pub fn item(&self, index: SceneIndex) -> Option<&CheckpointItem> {
        self.items.get(index)
    }

    pub fn item_mut(&mut self, index: SceneIndex) -> Option<&mut CheckpointItem> {
        self.items.get_mut(index)
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// True when every scene is `done`.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.count(ItemStatus::Done) == self.total
    }

    pub fn failed_indices(&self) -> Vec<SceneIndex> {
        self.indices_with(ItemStatus::Failed)
    }

    /// Indices that are not yet `done`.
    pub fn remaining_indices(&self) -> Vec<SceneIndex> {
        self.items
            .iter()
            .filter(|i| i.status != ItemStatus::Done)
            .map(|i| i.index)
            .collect()
    }

    pub fn indices_with(&self, status: ItemStatus) -> Vec<SceneIndex> {
        self.items
            .iter()
            .filter(|i| i.status == status)
            .map(|i| i.index)
            .collect()
    }

    /// Artifact reference for a scene, if that scene is `done`.
    pub fn artifact_ref(&self, index: SceneIndex) -> Option<&str> {
        self.item(index)
            .filter(|i| i.status == ItemStatus::Done)
            .and_then(|i| i.artifact_ref.as_deref())
    }

    /// Revert every `in_progress` item to `pending`.
    ///
    /// Returns the indices that changed.
    pub fn recover_interrupted(&mut self) -> Vec<SceneIndex> {
        self.items
            .iter_mut()
            .filter_map(|item| item.recover().then_some(item.index))
            .collect()
    }

    /// Check the structural invariants of a loaded checkpoint.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.items.len() != self.total {
            return Err(CoreError::Validation(format!(
                "Checkpoint for {} has {} items, expected {}",
                self.stage,
                self.items.len(),
                self.total
            )));
        }
        for (position, item) in self.items.iter().enumerate() {
            if item.index != position {
                return Err(CoreError::Validation(format!(
                    "Checkpoint item at position {position} has index {}",
                    item.index
                )));
            }
            let is_done = item.status == ItemStatus::Done;
            if is_done != item.artifact_ref.is_some() {
                return Err(CoreError::Validation(format!(
                    "Scene {position}: artifact must be present iff the item is done"
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch result
// ---------------------------------------------------------------------------

/// Aggregate outcome of a batch run.
///
/// A result with `failed > 0` is a partial success, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub stage: Stage,
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    /// Scenes left pending, only non-zero when the run was cancelled or blocked.
    pub pending: usize,
    pub failed_indices: Vec<SceneIndex>,
    pub cancelled: bool,
}

impl BatchResult {
    pub fn from_checkpoint(checkpoint: &BatchCheckpoint, cancelled: bool) -> Self {
        let done = checkpoint.count(ItemStatus::Done);
        let failed_indices = checkpoint.failed_indices();
        let failed = failed_indices.len();
        Self {
            stage: checkpoint.stage,
            total: checkpoint.total,
            done,
            failed,
            pending: checkpoint.total - done - failed,
            failed_indices,
            cancelled,
        }
    }

    /// Every scene is `done`.
    pub fn is_success(&self) -> bool {
        self.done == self.total
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
