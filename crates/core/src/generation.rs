//! The generation capability consumed by the batch orchestrator.
//!
//! A [`GenerationAdapter`] performs one unit of work: one image or one video
//! for one scene. Failures are tagged transient or permanent so the retry
//! policy can decide whether to try again.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::stage::Stage;
use crate::types::{ProjectId, SceneIndex};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure causes worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    Timeout,
    RateLimited,
    Server,
    Network,
}

/// Failure causes that will not go away by retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentKind {
    InvalidInput,
    QuotaExhausted,
    ContentRejected,
    Unauthorized,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Server => "server",
            Self::Network => "network",
        })
    }
}

impl fmt::Display for PermanentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidInput => "invalid_input",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ContentRejected => "content_rejected",
            Self::Unauthorized => "unauthorized",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("transient ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("permanent ({kind}): {message}")]
    Permanent { kind: PermanentKind, message: String },
}

impl AdapterError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        Self::Transient {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(kind: PermanentKind, message: impl Into<String>) -> Self {
        Self::Permanent {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

// ---------------------------------------------------------------------------
// Request + trait
// ---------------------------------------------------------------------------

/// Input for a single generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub project_id: ProjectId,
    pub stage: Stage,
    pub scene_index: SceneIndex,
    pub prompt: String,
    /// Artifact of the upstream stage for the same scene (the image, for a
    /// video request).
    pub dependency: Option<String>,
}

/// An external provider able to produce one artifact per call.
///
/// Implementations return an artifact reference that the checkpoint stores
/// verbatim. They must be safe to call concurrently.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> Result<String, AdapterError>;
}
