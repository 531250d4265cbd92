//! Scene prompt strategies, one per content category.
//!
//! A [`PromptStrategy`] turns a free-text description into exactly
//! [`SCENE_COUNT`](crate::project::SCENE_COUNT) ordered prompts. Strategies
//! are looked up by content-type tag in a [`PromptRegistry`]; adding a
//! category is a new strategy plus a [`PromptRegistry::register`] call.

pub mod templates;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::project::validate_prompts;

pub use templates::TemplateStrategy;

/// Produces ordered scene prompts for one content category.
#[async_trait]
pub trait PromptStrategy: Send + Sync {
    /// Tag this strategy is registered under.
    fn content_type(&self) -> &str;

    async fn generate(&self, description: &str) -> Result<Vec<String>, CoreError>;
}

/// Content-type tag to strategy lookup.
#[derive(Clone, Default)]
pub struct PromptRegistry {
    strategies: BTreeMap<String, Arc<dyn PromptStrategy>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in template strategy for every category.
    pub fn with_templates() -> Self {
        let mut registry = Self::new();
        for strategy in TemplateStrategy::all() {
            registry.register(Arc::new(strategy));
        }
        registry
    }

    /// Add or replace the strategy for `strategy.content_type()`.
    pub fn register(&mut self, strategy: Arc<dyn PromptStrategy>) {
        self.strategies
            .insert(strategy.content_type().to_string(), strategy);
    }

    pub fn get(&self, content_type: &str) -> Option<Arc<dyn PromptStrategy>> {
        self.strategies.get(content_type).cloned()
    }

    pub fn contains(&self, content_type: &str) -> bool {
        self.strategies.contains_key(content_type)
    }

    /// Registered tags in sorted order.
    pub fn content_types(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Generate prompts with the strategy for `content_type` and check the
    /// result has the right shape.
    pub async fn generate(
        &self,
        description: &str,
        content_type: &str,
    ) -> Result<Vec<String>, CoreError> {
        let strategy = self
            .get(content_type)
            .ok_or_else(|| CoreError::UnsupportedContentType(content_type.to_string()))?;
        let prompts = strategy.generate(description).await?;
        validate_prompts(&prompts)?;
        Ok(prompts)
    }
}

impl std::fmt::Debug for PromptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRegistry")
            .field("content_types", &self.content_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::project::SCENE_COUNT;

    struct ShortStrategy;

    #[async_trait]
    impl PromptStrategy for ShortStrategy {
        fn content_type(&self) -> &str {
            "short"
        }

        async fn generate(&self, _description: &str) -> Result<Vec<String>, CoreError> {
            Ok(vec!["only one".into()])
        }
    }

    #[test]
    fn templates_cover_builtin_categories() {
        let registry = PromptRegistry::with_templates();
        assert_eq!(
            registry.content_types(),
            vec!["cooking", "life", "mukbang", "travel"]
        );
    }

    #[tokio::test]
    async fn generate_returns_scene_count_prompts() {
        let registry = PromptRegistry::with_templates();
        let prompts = registry.generate("a corgi baking bread", "cooking").await.unwrap();
        assert_eq!(prompts.len(), SCENE_COUNT);
    }

    #[tokio::test]
    async fn unknown_tag_is_unsupported() {
        let registry = PromptRegistry::with_templates();
        assert_matches!(
            registry.generate("anything", "horror").await,
            Err(CoreError::UnsupportedContentType(tag)) if tag == "horror"
        );
    }

    #[tokio::test]
    async fn wrong_length_is_a_generation_error() {
        let mut registry = PromptRegistry::new();
        registry.register(Arc::new(ShortStrategy));
        assert_matches!(
            registry.generate("x", "short").await,
            Err(CoreError::PromptGeneration(_))
        );
    }
}
