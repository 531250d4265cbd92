//! Batch orchestration for the scene generation pipeline.
//!
//! [`BatchOrchestrator`] runs the per-scene generation calls of a stage under
//! a concurrency limit with retries, timeouts and cooperative cancellation,
//! recording every transition in a checkpoint. [`ProjectService`] exposes the
//! project-level operations built on top of it.

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod service;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use events::{EventBus, EventKind, PipelineEvent};
pub use orchestrator::{BatchOrchestrator, PipelineResult};
pub use service::{ProjectService, ProjectStatus};
