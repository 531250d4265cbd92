//! Run-level errors.
//!
//! Item-level adapter failures never show up here: they are resolved into
//! checkpoint state and reported through [`BatchResult`](shorts_core::checkpoint::BatchResult).

use shorts_core::error::CoreError;
use shorts_core::stage::Stage;
use shorts_core::store::StoreError;
use shorts_core::types::ProjectId;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Caller misuse: missing prompts, wrong stage order, bad arguments.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Batch already running for project {project_id}, stage {stage}")]
    BatchAlreadyRunning { project_id: ProjectId, stage: Stage },

    #[error("Project {0} not found")]
    NotFound(ProjectId),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage unavailable or inconsistent. The run stopped at its last
    /// committed state and can be resumed.
    #[error("Checkpoint storage error: {0}")]
    Checkpoint(#[from] StoreError),

    #[error("Prompt generation failed: {0}")]
    PromptGeneration(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Artifact storage failed: {0}")]
    Artifact(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for PipelineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) => Self::Validation(msg),
            CoreError::Precondition(msg) => Self::Precondition(msg),
            CoreError::UnsupportedContentType(tag) => Self::UnsupportedContentType(tag),
            CoreError::PromptGeneration(msg) => Self::PromptGeneration(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn core_errors_keep_their_kind() {
        assert_matches!(
            PipelineError::from(CoreError::Validation("bad".into())),
            PipelineError::Validation(msg) if msg == "bad"
        );
        assert_matches!(
            PipelineError::from(CoreError::Precondition("no prompts".into())),
            PipelineError::Precondition(_)
        );
        assert_matches!(
            PipelineError::from(CoreError::UnsupportedContentType("opera".into())),
            PipelineError::UnsupportedContentType(tag) if tag == "opera"
        );
        assert_matches!(
            PipelineError::from(CoreError::PromptGeneration("refused".into())),
            PipelineError::PromptGeneration(_)
        );
    }
}
