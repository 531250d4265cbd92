//! External collaborators of the pipeline.
//!
//! Generation adapters (Minimax over HTTP, and a placeholder with latency
//! and failure injection), the OpenAI-compatible prompt strategy, and the
//! filesystem artifact store they write into.

pub mod artifacts;
pub mod config;
pub mod minimax;
pub mod openai;
pub mod placeholder;

pub use artifacts::ArtifactStore;
pub use config::{ConfigError, ProviderConfig};
pub use minimax::MinimaxAdapter;
pub use openai::LlmPromptStrategy;
pub use placeholder::PlaceholderAdapter;
