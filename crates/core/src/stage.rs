//! Generation stages.
//!
//! A project runs through two stages, one asset per scene each. The video
//! stage depends on the image stage scene-for-scene.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One phase of generation across all scenes of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Image,
    Video,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 2] = [Stage::Image, Stage::Video];

    /// Stable identifier used in storage keys and URLs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// The stage whose artifact for the same scene must exist first.
    pub fn upstream(self) -> Option<Stage> {
        match self {
            Self::Image => None,
            Self::Video => Some(Self::Image),
        }
    }

    /// Directory name for this stage's artifacts within a project folder.
    pub fn artifact_dir(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" | "images" => Ok(Self::Image),
            "video" | "videos" => Ok(Self::Video),
            other => Err(CoreError::Validation(format!(
                "Unknown stage '{other}'. Must be one of: image, video"
            ))),
        }
    }
}
