//! Project model and lifecycle state machine.
//!
//! The lifecycle state is a projection of checkpoint completeness. It can be
//! recomputed at any time with [`derive_state`]; the value stored on the
//! project row is only a cache for listing.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::checkpoint::BatchCheckpoint;
use crate::error::CoreError;
use crate::stage::Stage;
use crate::types::{ProjectId, Timestamp};

/// Number of scenes in every project.
pub const SCENE_COUNT: usize = 10;

/// Upper bound on the free-text description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectState {
    Created,
    PromptsGenerated,
    ImagesRunning,
    ImagesPartial,
    ImagesDone,
    VideosRunning,
    VideosPartial,
    /// All videos done.
    Complete,
}

impl ProjectState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::PromptsGenerated => "PROMPTS_GENERATED",
            Self::ImagesRunning => "IMAGES_RUNNING",
            Self::ImagesPartial => "IMAGES_PARTIAL",
            Self::ImagesDone => "IMAGES_DONE",
            Self::VideosRunning => "VIDEOS_RUNNING",
            Self::VideosPartial => "VIDEOS_PARTIAL",
            Self::Complete => "COMPLETE",
        }
    }

    /// The state while a run for `stage` is active.
    pub fn running(stage: Stage) -> Self {
        match stage {
            Stage::Image => Self::ImagesRunning,
            Stage::Video => Self::VideosRunning,
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREATED" => Self::Created,
            "PROMPTS_GENERATED" => Self::PromptsGenerated,
            "IMAGES_RUNNING" => Self::ImagesRunning,
            "IMAGES_PARTIAL" => Self::ImagesPartial,
            "IMAGES_DONE" => Self::ImagesDone,
            "VIDEOS_RUNNING" => Self::VideosRunning,
            "VIDEOS_PARTIAL" => Self::VideosPartial,
            "COMPLETE" => Self::Complete,
            other => {
                return Err(CoreError::Validation(format!(
                    "Unknown project state '{other}'"
                )))
            }
        })
    }
}

/// Returns the valid next states from `current`.
pub fn valid_transitions(current: ProjectState) -> &'static [ProjectState] {
    use ProjectState::*;
    match current {
        Created => &[PromptsGenerated],
        PromptsGenerated => &[ImagesRunning],
        // A combined image+video run can finish in any video state.
        ImagesRunning => &[ImagesDone, ImagesPartial, VideosPartial, Complete],
        ImagesPartial => &[ImagesRunning],
        ImagesDone => &[VideosRunning],
        VideosRunning => &[Complete, VideosPartial],
        VideosPartial => &[VideosRunning],
        Complete => &[],
    }
}

pub fn can_transition(from: ProjectState, to: ProjectState) -> bool {
    valid_transitions(from).contains(&to)
}

/// Compute the lifecycle state from checkpoints and the set of active runs.
///
/// The video checkpoint only decides the state once every image is done;
/// before that the image checkpoint does.
pub fn derive_state(
    has_prompts: bool,
    image: Option<&BatchCheckpoint>,
    video: Option<&BatchCheckpoint>,
    active: &[Stage],
) -> ProjectState {
    if active.contains(&Stage::Image) {
        return ProjectState::ImagesRunning;
    }
    if active.contains(&Stage::Video) {
        return ProjectState::VideosRunning;
    }
    let images_done = image.is_some_and(BatchCheckpoint::is_complete);
    match (image, video) {
        (Some(_), Some(v)) if images_done => {
            if v.is_complete() {
                ProjectState::Complete
            } else {
                ProjectState::VideosPartial
            }
        }
        (Some(_), _) if images_done => ProjectState::ImagesDone,
        (Some(_), _) => ProjectState::ImagesPartial,
        (None, _) if has_prompts => ProjectState::PromptsGenerated,
        (None, _) => ProjectState::Created,
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub description: String,
    pub content_type: String,
    /// Absent until generated, then exactly [`SCENE_COUNT`] entries.
    pub prompts: Option<Vec<String>>,
    /// Cached projection, see [`derive_state`].
    pub state: ProjectState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    /// Validate input and build a new project in `CREATED`.
    pub fn new(description: &str, content_type: &str) -> Result<Self, CoreError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CoreError::Validation("Description must not be empty".into()));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::Validation(format!(
                "Description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        let content_type = content_type.trim().to_ascii_lowercase();
        if content_type.is_empty() {
            return Err(CoreError::Validation("Content type must not be empty".into()));
        }
        let now = Utc::now();
        Ok(Self {
            id: ProjectId::now_v7(),
            description: description.to_string(),
            content_type,
            prompts: None,
            state: ProjectState::Created,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn has_prompts(&self) -> bool {
        self.prompts.is_some()
    }

    /// Prompt for a scene, if prompts exist.
    pub fn prompt(&self, index: usize) -> Option<&str> {
        self.prompts.as_ref()?.get(index).map(String::as_str)
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id,
            description: self.description.clone(),
            content_type: self.content_type.clone(),
            state: self.state,
            created_at: self.created_at,
        }
    }
}

/// Listing row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub description: String,
    pub content_type: String,
    pub state: ProjectState,
    pub created_at: Timestamp,
}

/// Check a strategy's output before it is stored.
pub fn validate_prompts(prompts: &[String]) -> Result<(), CoreError> {
    if prompts.len() != SCENE_COUNT {
        return Err(CoreError::PromptGeneration(format!(
            "Expected {SCENE_COUNT} prompts, got {}",
            prompts.len()
        )));
    }
    if let Some(i) = prompts.iter().position(|p| p.trim().is_empty()) {
        return Err(CoreError::PromptGeneration(format!("Prompt {i} is empty")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
