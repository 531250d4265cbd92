//! Mutual exclusion for batch runs.
//!
//! At most one run may be active per `(project, stage)`. A run holds a
//! [`RunGuard`] for its whole lifetime; dropping the guard (normal return,
//! error, panic, or task abort) releases the slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shorts_core::stage::Stage;
use shorts_core::types::ProjectId;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

type RunKey = (ProjectId, Stage);

#[derive(Debug, Default)]
pub struct RunRegistry {
    active: Mutex<HashMap<RunKey, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<RunKey, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim every stage in `stages` for `project_id`, all or nothing.
    ///
    /// The claimed stages share one cancellation token.
    pub fn acquire(
        self: &Arc<Self>,
        project_id: ProjectId,
        stages: &[Stage],
    ) -> Result<RunGuard, PipelineError> {
        self.claim(project_id, stages, CancellationToken::new())
    }

    /// Like [`acquire`](Self::acquire), but the run is also cancelled when
    /// `parent` is.
    pub fn acquire_child(
        self: &Arc<Self>,
        project_id: ProjectId,
        stages: &[Stage],
        parent: &CancellationToken,
    ) -> Result<RunGuard, PipelineError> {
        self.claim(project_id, stages, parent.child_token())
    }

    fn claim(
        self: &Arc<Self>,
        project_id: ProjectId,
        stages: &[Stage],
        token: CancellationToken,
    ) -> Result<RunGuard, PipelineError> {
        let mut active = self.active();
        if let Some(&stage) = stages.iter().find(|s| active.contains_key(&(project_id, **s))) {
            return Err(PipelineError::BatchAlreadyRunning { project_id, stage });
        }
        for &stage in stages {
            active.insert((project_id, stage), token.clone());
        }
        Ok(RunGuard {
            registry: Arc::clone(self),
            project_id,
            stages: stages.to_vec(),
            token,
        })
    }

    /// Signal the active run for `(project_id, stage)` to stop.
    ///
    /// Returns `false` if no such run exists.
    pub fn cancel(&self, project_id: ProjectId, stage: Stage) -> bool {
        match self.active().get(&(project_id, stage)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, project_id: ProjectId, stage: Stage) -> bool {
        self.active().contains_key(&(project_id, stage))
    }

    /// Stages with an active run, in execution order.
    pub fn active_stages(&self, project_id: ProjectId) -> Vec<Stage> {
        let active = self.active();
        Stage::ALL
            .into_iter()
            .filter(|s| active.contains_key(&(project_id, *s)))
            .collect()
    }
}

/// Proof of exclusive access to one or more `(project, stage)` slots.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    project_id: ProjectId,
    stages: Vec<Stage>,
    token: CancellationToken,
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = self.registry.active();
        for &stage in &self.stages {
            active.remove(&(self.project_id, stage));
        }
    }
}
