//! Scene prompts from an OpenAI-compatible chat completion endpoint.
//!
//! The model is asked for a JSON array of scene descriptions. Refusals,
//! malformed output, and transport failures fall back to the category's
//! template strategy so prompt generation still succeeds.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shorts_core::error::CoreError;
use shorts_core::project::SCENE_COUNT;
use shorts_core::prompts::templates::STYLE_SUFFIX;
use shorts_core::prompts::PromptStrategy;

use crate::config::OpenAiConfig;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

pub struct LlmPromptStrategy {
    client: reqwest::Client,
    config: OpenAiConfig,
    fallback: Arc<dyn PromptStrategy>,
}

impl LlmPromptStrategy {
    /// Wrap `fallback`, registering under the same content type.
    pub fn new(config: OpenAiConfig, fallback: Arc<dyn PromptStrategy>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            fallback,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You write scene descriptions for image generation of a {category} short video.\n\
             Create {SCENE_COUNT} sequential scenes in English, 20-30 words each, that tell a \
             natural story. Every scene must be self-contained: restate the subject and the \
             setting and never refer to other scenes. End each scene with: {STYLE_SUFFIX}\n\
             Return only a JSON array of {SCENE_COUNT} strings.",
            category = self.fallback.content_type(),
        )
    }

    async fn request_scenes(&self, description: &str) -> Result<String, String> {
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "system", "content": self.system_prompt()},
                {"role": "user", "content": format!("Story: {description}")},
            ],
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let parsed: ChatResponse = response.json().await.map_err(|e| e.to_string())?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "empty completion".to_string())
    }

    async fn fall_back(&self, description: &str, reason: &str) -> Result<Vec<String>, CoreError> {
        tracing::warn!(
            content_type = self.fallback.content_type(),
            reason,
            "Falling back to template prompts",
        );
        self.fallback.generate(description).await
    }
}

#[async_trait]
impl PromptStrategy for LlmPromptStrategy {
    fn content_type(&self) -> &str {
        self.fallback.content_type()
    }

    async fn generate(&self, description: &str) -> Result<Vec<String>, CoreError> {
        let text = match self.request_scenes(description).await {
            Ok(text) => text,
            Err(e) => return self.fall_back(description, &e).await,
        };
        if is_refusal(&text) {
            return self.fall_back(description, "model refused").await;
        }
        match parse_scene_list(&text) {
            Some(scenes) => Ok(scenes),
            None => self.fall_back(description, "malformed scene list").await,
        }
    }
}

/// Heuristic for a model declining the request.
pub fn is_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["sorry", "can't assist", "cannot assist", "i can't help"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Parse a JSON array of exactly [`SCENE_COUNT`] non-blank strings, with or
/// without a surrounding Markdown code fence.
pub fn parse_scene_list(text: &str) -> Option<Vec<String>> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let unfenced = unfenced.strip_suffix("```").unwrap_or(unfenced).trim();

    let scenes: Vec<String> = serde_json::from_str(unfenced).ok()?;
    let valid = scenes.len() == SCENE_COUNT && scenes.iter().all(|s| !s.trim().is_empty());
    valid.then_some(scenes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenes_json(n: usize) -> String {
        let scenes: Vec<String> = (0..n).map(|i| format!("scene {i}")).collect();
        serde_json::to_string(&scenes).unwrap()
    }

    #[test]
    fn parses_plain_array() {
        assert_eq!(parse_scene_list(&scenes_json(SCENE_COUNT)).unwrap().len(), SCENE_COUNT);
    }

    #[test]
    fn parses_fenced_array() {
        let text = format!("```json\n{}\n```", scenes_json(SCENE_COUNT));
        assert!(parse_scene_list(&text).is_some());
    }

    #[test]
    fn rejects_wrong_count_and_prose() {
        assert!(parse_scene_list(&scenes_json(SCENE_COUNT - 1)).is_none());
        assert!(parse_scene_list("Here are your scenes: ...").is_none());
    }

    #[test]
    fn detects_refusal() {
        assert!(is_refusal("I'm sorry, but I can't assist with that."));
        assert!(!is_refusal(&scenes_json(SCENE_COUNT)));
    }
}
