//! A generation adapter that makes no network calls.
//!
//! Serves as the default provider in development and as the test double for
//! orchestrator tests: latency and per-scene failures are configurable, and
//! every call is recorded so tests can check concurrency and ordering.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use shorts_core::generation::{
    AdapterError, GenerationAdapter, GenerationRequest, PermanentKind,
};
use shorts_core::stage::Stage;
use shorts_core::types::SceneIndex;

type SceneKey = (Stage, SceneIndex);

/// One entry of the dispatch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Started {
        stage: Stage,
        index: SceneIndex,
        dependency: Option<String>,
    },
    Finished {
        stage: Stage,
        index: SceneIndex,
        ok: bool,
    },
}

#[derive(Debug, Default)]
struct Script {
    /// Errors returned, in order, before the scene succeeds.
    failures: HashMap<SceneKey, VecDeque<AdapterError>>,
    /// Errors returned on every call.
    always: HashMap<SceneKey, AdapterError>,
    /// Scenes whose calls never complete.
    hang: HashSet<SceneKey>,
}

#[derive(Debug, Default)]
pub struct PlaceholderAdapter {
    latency: Duration,
    script: Mutex<Script>,
    calls: Mutex<HashMap<SceneKey, u32>>,
    log: Mutex<Vec<CallEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tolerate poisoning: a panicking test thread must not cascade.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PlaceholderAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next `times` calls for a scene with `error`, then succeed.
    pub fn fail_times(self, stage: Stage, index: SceneIndex, times: usize, error: AdapterError) -> Self {
        lock(&self.script)
            .failures
            .insert((stage, index), std::iter::repeat(error).take(times).collect());
        self
    }

    /// Fail every call for a scene with `error`.
    pub fn fail_always(self, stage: Stage, index: SceneIndex, error: AdapterError) -> Self {
        lock(&self.script).always.insert((stage, index), error);
        self
    }

    /// Calls for a scene never return; only a timeout or drop ends them.
    pub fn hang_on(self, stage: Stage, index: SceneIndex) -> Self {
        lock(&self.script).hang.insert((stage, index));
        self
    }

    /// Stop failing a scene from now on.
    pub fn heal(&self, stage: Stage, index: SceneIndex) {
        let mut script = lock(&self.script);
        script.failures.remove(&(stage, index));
        script.always.remove(&(stage, index));
        script.hang.remove(&(stage, index));
    }

    pub fn calls_for(&self, stage: Stage, index: SceneIndex) -> u32 {
        lock(&self.calls).get(&(stage, index)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.calls).values().sum()
    }

    /// Highest number of calls observed in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Start and finish events in the order they happened.
    pub fn dispatch_log(&self) -> Vec<CallEvent> {
        lock(&self.log).clone()
    }

    fn next_outcome(&self, key: SceneKey) -> Option<Result<(), AdapterError>> {
        let mut script = lock(&self.script);
        if script.hang.contains(&key) {
            return None;
        }
        if let Some(error) = script.always.get(&key) {
            return Some(Err(error.clone()));
        }
        match script.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(error) => Some(Err(error)),
            None => Some(Ok(())),
        }
    }
}

/// Decrements the in-flight counter when a call ends, even if its future is
/// dropped mid-flight by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl GenerationAdapter for PlaceholderAdapter {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, AdapterError> {
        let key = (request.stage, request.scene_index);
        *lock(&self.calls).entry(key).or_default() += 1;
        lock(&self.log).push(CallEvent::Started {
            stage: request.stage,
            index: request.scene_index,
            dependency: request.dependency.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        } else {
            tokio::task::yield_now().await;
        }

        let outcome = match self.next_outcome(key) {
            Some(outcome) => outcome,
            None => std::future::pending().await,
        };
        let outcome = outcome.and_then(|()| {
            if request.stage == Stage::Video && request.dependency.is_none() {
                Err(AdapterError::permanent(
                    PermanentKind::InvalidInput,
                    "video requires an image artifact",
                ))
            } else {
                Ok(())
            }
        });

        lock(&self.log).push(CallEvent::Finished {
            stage: request.stage,
            index: request.scene_index,
            ok: outcome.is_ok(),
        });
        outcome.map(|()| {
            format!(
                "placeholder/{}/{}/scene_{}",
                request.project_id,
                request.stage.artifact_dir(),
                request.scene_index
            )
        })
    }
}
