use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TryOnError, TryOnResult};

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_ADVICE_MODEL: &str = "gemini-2.5-flash";

const COMPOSITE_INSTRUCTION: &str = "\
You are an expert AI in photorealistic apparel visualization. Your task is to perform a virtual try-on.
You will be given two images:
1. A garment image: This first image contains the clothing item to be put on the person.
2. A person's image: This second image shows the person who will wear the clothing.

Follow these instructions precisely:
1. **Isolate the Garment:** In the first image, identify and mentally isolate the primary clothing item. It might be on a hanger, on a bed, or in a non-ideal setting. Ignore any background, hangers, or other distracting elements.
2. **Analyze the Garment:** Understand the clothing item's type, shape, texture, and how it would drape on a body.
3. **Analyze the Person:** In the second image, analyze the person's body shape, pose and posture, and the lighting conditions of their environment.
4. **Perform Photorealistic Replacement:** REPLACE the clothes the person is currently wearing with the isolated garment. This is not an overlay.
5. **Maintain Realism:** The new garment must conform to the person's body contours and pose. Lighting, shadows, and perspective on the garment must match the original photo.
6. **Preserve Everything Else:** Do NOT alter the person's body, face, hair, or skin tone. The background must remain unchanged. The only change is swapping the clothes.
7. **Final Output:** Generate a single, high-resolution, photorealistic image of the result. Do not include any text, logos, or other artifacts.";

const DESCRIBED_OUTFIT_INSTRUCTION: &str = "\
**ROLE: Expert CGI Digital Stylist**
**TASK: Change the clothing of the person in the image based on the following description: \"{prompt}\".**
**INSTRUCTIONS:**
1. Completely replace the original clothing.
2. Reconstruct the person's body shape to realistically fit the new attire.
3. Render the new clothing with photorealistic lighting, shadows, and textures.
4. Do NOT change the person's face, hair, body position, or the background.";

const STYLIST_PERSONA: &str = "\
You are a friendly, encouraging personal fashion stylist. Look at the outfit in the image and give \
short, practical styling advice: what works, one or two accessories or shoes that would complete \
the look, and an occasion it suits. Keep it under 120 words and use **bold** for key items.";

const COMPOSITE_ADVICE_CONTEXT: &str = "A new outfit from an uploaded garment.";

/// Instruction text sent to the model. Product content, tunable from the
/// config file without touching the session logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub composite: String,
    /// Wraps a chat turn when no result image exists yet; `{prompt}` is
    /// replaced with the user's text.
    pub described_outfit: String,
    pub stylist_persona: String,
    pub composite_advice_context: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            composite: COMPOSITE_INSTRUCTION.to_string(),
            described_outfit: DESCRIBED_OUTFIT_INSTRUCTION.to_string(),
            stylist_persona: STYLIST_PERSONA.to_string(),
            composite_advice_context: COMPOSITE_ADVICE_CONTEXT.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn described_outfit_for(&self, prompt: &str) -> String {
        self.described_outfit.replace("{prompt}", prompt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub image_model: String,
    pub advice_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            advice_model: DEFAULT_ADVICE_MODEL.to_string(),
        }
    }
}

/// Which image part wins when a response carries more than one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSelection {
    #[default]
    First,
    Last,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsePolicy {
    pub image_selection: ImageSelection,
    /// Treat a response without an image as a failure of composite and
    /// edit calls instead of returning the text alone.
    pub require_image: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylistConfig {
    pub models: ModelConfig,
    pub prompts: PromptTemplates,
    pub policy: ParsePolicy,
}

impl StylistConfig {
    pub fn from_toml_str(raw: &str) -> TryOnResult<Self> {
        toml::from_str(raw).map_err(|err| TryOnError::Config(err.to_string()))
    }

    /// Loads the TOML file at `path`, or the built-in defaults when no path
    /// is given.
    pub fn load(path: Option<&Path>) -> TryOnResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .map_err(|err| TryOnError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> anyhow::Result<()> {
        let config = StylistConfig::from_toml_str("")?;
        assert_eq!(config, StylistConfig::default());
        assert_eq!(config.models.image_model, DEFAULT_IMAGE_MODEL);
        assert_eq!(config.policy.image_selection, ImageSelection::First);
        assert!(!config.policy.require_image);
        Ok(())
    }

    #[test]
    fn partial_sections_override_only_named_keys() -> anyhow::Result<()> {
        let config = StylistConfig::from_toml_str(
            r#"
[models]
image_model = "gemini-3-pro-image-preview"

[prompts]
described_outfit = "Dress them in: {prompt}"

[policy]
image_selection = "last"
require_image = true
"#,
        )?;
        assert_eq!(config.models.image_model, "gemini-3-pro-image-preview");
        assert_eq!(config.models.advice_model, DEFAULT_ADVICE_MODEL);
        assert_eq!(
            config.prompts.described_outfit_for("a red dress"),
            "Dress them in: a red dress"
        );
        assert_eq!(config.prompts.composite, COMPOSITE_INSTRUCTION);
        assert_eq!(config.policy.image_selection, ImageSelection::Last);
        assert!(config.policy.require_image);
        Ok(())
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = StylistConfig::from_toml_str("[policy]\nimage_selection = \"middle\"")
            .expect_err("unknown selection accepted");
        assert!(matches!(err, TryOnError::Config(_)));
    }

    #[test]
    fn default_wrapper_quotes_the_description() {
        let wrapped = PromptTemplates::default().described_outfit_for("a red dress");
        assert!(wrapped.contains("following description: \"a red dress\""));
        assert!(!wrapped.contains("{prompt}"));
    }

    #[test]
    fn load_without_path_uses_defaults() -> anyhow::Result<()> {
        assert_eq!(StylistConfig::load(None)?, StylistConfig::default());
        Ok(())
    }
}
