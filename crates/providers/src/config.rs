//! Provider selection and credentials, read once at startup.

use std::time::Duration;

use shorts_core::config::{parse_or, process_env, required, string_or};
pub use shorts_core::config::ConfigError;

/// Motion prompt sent with every image-to-video request.
pub const DEFAULT_VIDEO_PROMPT: &str = "Create smooth, natural camera movement and bring the \
    scene to life with subtle animations, maintaining character consistency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationProvider {
    Placeholder,
    Minimax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptProvider {
    Template,
    OpenAi,
}

#[derive(Debug, Clone)]
pub struct MinimaxConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_model: String,
    pub video_model: String,
    pub aspect_ratio: String,
    pub video_prompt: String,
    pub image_poll_interval: Duration,
    pub image_max_polls: u32,
    pub video_poll_interval: Duration,
    pub video_max_polls: u32,
}

impl MinimaxConfig {
    /// Longest time a single call may spend polling for a task result.
    ///
    /// Must stay below the orchestrator's per-call timeout, or polling
    /// exhaustion is never reported.
    pub fn poll_budget(&self) -> Duration {
        let image = self.image_poll_interval * self.image_max_polls;
        let video = self.video_poll_interval * self.video_max_polls;
        image.max(video)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Which providers to use and how to reach them.
///
/// Constructed once and shared read-only.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub generation: GenerationProvider,
    /// Present iff `generation == Minimax`.
    pub minimax: Option<MinimaxConfig>,
    pub prompts: PromptProvider,
    /// Present iff `prompts == OpenAi`.
    pub openai: Option<OpenAiConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            generation: GenerationProvider::Placeholder,
            minimax: None,
            prompts: PromptProvider::Template,
            openai: None,
        }
    }
}

impl ProviderConfig {
    /// Load from the process environment.
    ///
    /// | Env Var                      | Default                          |
    /// |------------------------------|----------------------------------|
    /// | `GENERATION_PROVIDER`        | `placeholder` (or `minimax`)     |
    /// | `MINIMAX_API_KEY`            | required for `minimax`           |
    /// | `MINIMAX_BASE_URL`           | `https://api.minimaxi.chat/v1`   |
    /// | `MINIMAX_IMAGE_MODEL`        | `image-01`                       |
    /// | `MINIMAX_VIDEO_MODEL`        | `I2V-01`                         |
    /// | `MINIMAX_ASPECT_RATIO`       | `16:9`                           |
    /// | `MINIMAX_IMAGE_POLL_SECS`    | `3`                              |
    /// | `MINIMAX_IMAGE_MAX_POLLS`    | `60`                             |
    /// | `MINIMAX_VIDEO_POLL_SECS`    | `5`                              |
    /// | `MINIMAX_VIDEO_MAX_POLLS`    | `100`                            |
    /// | `PROMPT_PROVIDER`            | `template` (or `openai`)         |
    /// | `OPENAI_API_KEY`             | required for `openai`            |
    /// | `OPENAI_BASE_URL`            | `https://api.openai.com/v1`      |
    /// | `OPENAI_MODEL`               | `gpt-4o`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let generation = match string_or(&lookup, "GENERATION_PROVIDER", "placeholder")
            .to_ascii_lowercase()
            .as_str()
        {
            "placeholder" => GenerationProvider::Placeholder,
            "minimax" => GenerationProvider::Minimax,
            other => {
                return Err(ConfigError::Invalid {
                    var: "GENERATION_PROVIDER",
                    value: other.to_string(),
                    reason: "expected placeholder or minimax".into(),
                })
            }
        };

        let minimax = match generation {
            GenerationProvider::Minimax => Some(MinimaxConfig {
                api_key: required(&lookup, "MINIMAX_API_KEY")?,
                base_url: trim_slash(string_or(
                    &lookup,
                    "MINIMAX_BASE_URL",
                    "https://api.minimaxi.chat/v1",
                )),
                image_model: string_or(&lookup, "MINIMAX_IMAGE_MODEL", "image-01"),
                video_model: string_or(&lookup, "MINIMAX_VIDEO_MODEL", "I2V-01"),
                aspect_ratio: string_or(&lookup, "MINIMAX_ASPECT_RATIO", "16:9"),
                video_prompt: string_or(&lookup, "MINIMAX_VIDEO_PROMPT", DEFAULT_VIDEO_PROMPT),
                image_poll_interval: Duration::from_secs(parse_or(
                    &lookup,
                    "MINIMAX_IMAGE_POLL_SECS",
                    3u64,
                )?),
                image_max_polls: parse_or(&lookup, "MINIMAX_IMAGE_MAX_POLLS", 60u32)?,
                video_poll_interval: Duration::from_secs(parse_or(
                    &lookup,
                    "MINIMAX_VIDEO_POLL_SECS",
                    5u64,
                )?),
                video_max_polls: parse_or(&lookup, "MINIMAX_VIDEO_MAX_POLLS", 100u32)?,
            }),
            GenerationProvider::Placeholder => None,
        };

        let prompts = match string_or(&lookup, "PROMPT_PROVIDER", "template")
            .to_ascii_lowercase()
            .as_str()
        {
            "template" => PromptProvider::Template,
            "openai" => PromptProvider::OpenAi,
            other => {
                return Err(ConfigError::Invalid {
                    var: "PROMPT_PROVIDER",
                    value: other.to_string(),
                    reason: "expected template or openai".into(),
                })
            }
        };

        let openai = match prompts {
            PromptProvider::OpenAi => Some(OpenAiConfig {
                api_key: required(&lookup, "OPENAI_API_KEY")?,
                base_url: trim_slash(string_or(
                    &lookup,
                    "OPENAI_BASE_URL",
                    "https://api.openai.com/v1",
                )),
                model: string_or(&lookup, "OPENAI_MODEL", "gpt-4o"),
                temperature: parse_or(&lookup, "OPENAI_TEMPERATURE", 0.7f32)?,
                max_tokens: parse_or(&lookup, "OPENAI_MAX_TOKENS", 1500u32)?,
            }),
            PromptProvider::Template => None,
        };

        Ok(Self {
            generation,
            minimax,
            prompts,
            openai,
        })
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
