//! Domain error type shared by every crate in the workspace.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Caller misuse: missing prompts, wrong stage order, illegal item transition.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("Prompt generation failed: {0}")]
    PromptGeneration(String),
}
