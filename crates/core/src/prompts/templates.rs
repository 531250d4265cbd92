//! Deterministic prompt templates for the built-in content categories.
//!
//! Each prompt is self-contained: it restates the subject and the setting
//! instead of referring to earlier scenes, so image models render every
//! scene with the same look.

use async_trait::async_trait;

use super::PromptStrategy;
use crate::error::CoreError;
use crate::project::SCENE_COUNT;

/// Style parameters appended to every scene prompt.
pub const STYLE_SUFFIX: &str =
    "--style raw --style photographic --v 6 --ar 9:16 consistent lighting";

/// A fixed ten-beat story arc for one content category.
#[derive(Debug, Clone)]
pub struct TemplateStrategy {
    content_type: &'static str,
    setting: &'static str,
    beats: [&'static str; SCENE_COUNT],
}

impl TemplateStrategy {
    pub fn cooking() -> Self {
        Self {
            content_type: "cooking",
            setting: "modern rustic kitchen with white subway tiles, warm oak countertops, \
                      natural daylight from a large window, camera at counter level",
            beats: [
                "wearing a white chef's hat and apron, laying out fresh ingredients on a wooden cutting board",
                "washing vegetables under the tap with careful attention",
                "chopping vegetables into even pieces with a sharp knife",
                "measuring spices into small glass bowls",
                "heating oil in a pan until it shimmers",
                "adding ingredients to the sizzling pan with a wooden spoon",
                "stirring the pot as steam rises into the light",
                "tasting the dish from a spoon with a satisfied expression",
                "plating the finished dish neatly on a white ceramic plate",
                "presenting the finished dish proudly to the camera",
            ],
        }
    }

    pub fn life() -> Self {
        Self {
            content_type: "life",
            setting: "cozy sunlit apartment with plants by the window and soft morning light",
            beats: [
                "waking up and stretching by the window",
                "making a warm drink in the small kitchen",
                "getting dressed and ready for the day",
                "stepping outside into a quiet tree-lined street",
                "running a small errand at a neighborhood shop",
                "meeting a friend and sharing a laugh",
                "taking a peaceful break in a nearby park",
                "returning home with a bag of groceries",
                "relaxing on the sofa with a book",
                "settling down for the night as the lamps glow warmly",
            ],
        }
    }

    pub fn travel() -> Self {
        Self {
            content_type: "travel",
            setting: "bright destination with wide open scenery and golden hour light",
            beats: [
                "packing a backpack with travel essentials",
                "arriving at the station with a ticket in hand",
                "looking out the window at passing landscapes",
                "stepping out at the destination and taking in the view",
                "exploring narrow streets full of local shops",
                "tasting a local street food specialty",
                "climbing to a scenic viewpoint",
                "taking a photo of the panorama",
                "watching the sunset over the horizon",
                "writing in a travel journal at a quiet cafe",
            ],
        }
    }

    pub fn mukbang() -> Self {
        Self {
            content_type: "mukbang",
            setting: "clean table facing the camera with soft studio lighting and a neutral backdrop",
            beats: [
                "sitting at the table and greeting the camera",
                "revealing a generous spread of dishes",
                "picking up chopsticks with excitement",
                "taking the first big bite with delight",
                "showing the texture of the food up close",
                "sipping a cold drink between bites",
                "trying a spicy dish and reacting",
                "finishing one plate and moving to the next",
                "leaning back with a satisfied smile",
                "waving goodbye beside the empty plates",
            ],
        }
    }

    /// Every built-in category.
    pub fn all() -> Vec<Self> {
        vec![Self::cooking(), Self::life(), Self::travel(), Self::mukbang()]
    }

    /// Render the prompts without going through the async trait.
    pub fn render(&self, description: &str) -> Vec<String> {
        let subject = description.trim();
        self.beats
            .iter()
            .map(|beat| {
                format!(
                    "Photorealistic scene of {subject}, {beat}. Setting: {}. {STYLE_SUFFIX}",
                    self.setting
                )
            })
            .collect()
    }
}

#[async_trait]
impl PromptStrategy for TemplateStrategy {
    fn content_type(&self) -> &str {
        self.content_type
    }

    async fn generate(&self, description: &str) -> Result<Vec<String>, CoreError> {
        if description.trim().is_empty() {
            return Err(CoreError::PromptGeneration(
                "Description must not be empty".into(),
            ));
        }
        Ok(self.render(description))
    }
}
