use tracing::debug;
use tryon_contracts::config::{ImageSelection, ModelConfig, ParsePolicy, PromptTemplates, StylistConfig};
use tryon_contracts::{EncodedImage, TryOnError, TryOnResult};

use crate::service::{ContentPart, GenerateRequest, GenerateResponse, GenerativeService, Modality};

/// What an image-producing call returned. At least one field is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub image: Option<EncodedImage>,
    pub text: Option<String>,
}

/// Builds the three stylist requests and folds responses into
/// [`Generation`]s.
pub struct StylistClient<S> {
    service: S,
    models: ModelConfig,
    prompts: PromptTemplates,
    policy: ParsePolicy,
}

impl<S: GenerativeService> StylistClient<S> {
    pub fn new(service: S, config: StylistConfig) -> Self {
        Self {
            service,
            models: config.models,
            prompts: config.prompts,
            policy: config.policy,
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn prompts(&self) -> &PromptTemplates {
        &self.prompts
    }

    /// Puts the garment on the person. Parts go garment, person,
    /// instruction; the model relies on that order.
    pub async fn composite(
        &self,
        person: &EncodedImage,
        garment: &EncodedImage,
    ) -> TryOnResult<Generation> {
        let request = GenerateRequest {
            model: self.models.image_model.clone(),
            parts: vec![
                ContentPart::image(garment),
                ContentPart::image(person),
                ContentPart::text(self.prompts.composite.clone()),
            ],
            modalities: vec![Modality::Image, Modality::Text],
            system_instruction: None,
        };
        let response = self.service.generate(&request).await?;
        parse_generation(&response, self.policy)
    }

    pub async fn edit(&self, base: &EncodedImage, instruction: &str) -> TryOnResult<Generation> {
        let request = GenerateRequest {
            model: self.models.image_model.clone(),
            parts: vec![ContentPart::image(base), ContentPart::text(instruction)],
            modalities: vec![Modality::Image, Modality::Text],
            system_instruction: None,
        };
        let response = self.service.generate(&request).await?;
        parse_generation(&response, self.policy)
    }

    pub async fn advice(&self, image: &EncodedImage, context: &str) -> TryOnResult<String> {
        let request = GenerateRequest {
            model: self.models.advice_model.clone(),
            parts: vec![ContentPart::image(image), ContentPart::text(context)],
            modalities: vec![Modality::Text],
            system_instruction: Some(self.prompts.stylist_persona.clone()),
        };
        let response = self.service.generate(&request).await?;
        let generation = parse_parts(&response, self.policy.image_selection)?;
        generation
            .text
            .filter(|text| !text.trim().is_empty())
            .ok_or(TryOnError::NoAdviceProduced)
    }
}

/// Applies the response policy: one pass over the first candidate's parts,
/// image parts picked per `image_selection`, text parts concatenated.
pub fn parse_generation(response: &GenerateResponse, policy: ParsePolicy) -> TryOnResult<Generation> {
    let generation = parse_parts(response, policy.image_selection)?;
    if policy.require_image && generation.image.is_none() {
        return Err(TryOnError::NoImageProduced);
    }
    Ok(generation)
}

fn parse_parts(response: &GenerateResponse, selection: ImageSelection) -> TryOnResult<Generation> {
    let Some(candidate) = response.candidates.first() else {
        return Err(TryOnError::EmptyResponse);
    };

    let mut generation = Generation::default();
    let mut text = String::new();
    let mut saw_text = false;
    for part in &candidate.parts {
        match part {
            ContentPart::InlineData { mime_type, data } if mime_type.starts_with("image/") => {
                if generation.image.is_none() || selection == ImageSelection::Last {
                    generation.image = Some(EncodedImage::from_inline(mime_type, data));
                }
            }
            ContentPart::InlineData { mime_type, .. } => {
                debug!(mime_type = %mime_type, "skipping non-image inline part");
            }
            ContentPart::Text(chunk) => {
                saw_text = true;
                text.push_str(chunk);
            }
        }
    }
    if saw_text && !text.trim().is_empty() {
        generation.text = Some(text);
    }

    if generation.image.is_none() && generation.text.is_none() {
        return Err(TryOnError::EmptyResponse);
    }
    Ok(generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{image_part, ScriptedService};

    fn person() -> EncodedImage {
        EncodedImage::from_inline("image/jpeg", "UEVSU09O")
    }

    fn garment() -> EncodedImage {
        EncodedImage::from_inline("image/png", "R0FSTUVOVA==")
    }

    fn client(service: ScriptedService) -> StylistClient<ScriptedService> {
        StylistClient::new(service, StylistConfig::default())
    }

    #[tokio::test]
    async fn composite_orders_garment_person_instruction() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![image_part("UkVTVUxU"), ContentPart::text("Voilà!")]);
        let client = client(service.clone());

        let generation = client.composite(&person(), &garment()).await?;
        assert_eq!(
            generation.image,
            Some(EncodedImage::from_inline("image/png", "UkVTVUxU"))
        );
        assert_eq!(generation.text.as_deref(), Some("Voilà!"));

        let requests = service.requests();
        assert_eq!(requests.len(), 1);
        let parts = &requests[0].parts;
        assert_eq!(parts[0], ContentPart::image(&garment()));
        assert_eq!(parts[1], ContentPart::image(&person()));
        assert_eq!(parts[2].as_text(), Some(client.prompts().composite.as_str()));
        assert_eq!(requests[0].modalities, vec![Modality::Image, Modality::Text]);
        Ok(())
    }

    #[tokio::test]
    async fn text_only_response_yields_caption_without_image() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![ContentPart::text("I can't see a garment.")]);
        let generation = client(service).composite(&person(), &garment()).await?;
        assert_eq!(generation.image, None);
        assert_eq!(generation.text.as_deref(), Some("I can't see a garment."));
        Ok(())
    }

    #[tokio::test]
    async fn require_image_policy_rejects_text_only() {
        let service = ScriptedService::new();
        service.push_ok(vec![ContentPart::text("no image for you")]);
        let mut config = StylistConfig::default();
        config.policy.require_image = true;
        let err = StylistClient::new(service, config)
            .edit(&person(), "make it red")
            .await
            .expect_err("text-only accepted");
        assert!(matches!(err, TryOnError::NoImageProduced));
    }

    #[tokio::test]
    async fn empty_responses_fail_every_operation() {
        let service = ScriptedService::new();
        service.push_ok(Vec::new());
        service.push(Ok(GenerateResponse::default()));
        service.push_ok(Vec::new());
        let client = client(service);

        let composite = client.composite(&person(), &garment()).await.expect_err("composite");
        let edit = client.edit(&person(), "shorter").await.expect_err("edit");
        let advice = client.advice(&person(), "context").await.expect_err("advice");
        for err in [composite, edit, advice] {
            assert!(matches!(err, TryOnError::EmptyResponse));
            assert!(!err.is_validation());
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn image_selection_policy_picks_first_or_last() -> anyhow::Result<()> {
        let response = GenerateResponse::single(vec![
            image_part("Rk9P"),
            ContentPart::text("one "),
            image_part("QkFS"),
            ContentPart::text("two"),
        ]);
        let first = parse_generation(&response, ParsePolicy::default())?;
        assert_eq!(first.image.as_ref().map(EncodedImage::base64), Some("Rk9P"));
        assert_eq!(first.text.as_deref(), Some("one two"));

        let last = parse_generation(
            &response,
            ParsePolicy {
                image_selection: ImageSelection::Last,
                require_image: false,
            },
        )?;
        assert_eq!(last.image.as_ref().map(EncodedImage::base64), Some("QkFS"));
        Ok(())
    }

    #[test]
    fn non_image_inline_parts_are_not_results() {
        let response = GenerateResponse::single(vec![ContentPart::InlineData {
            mime_type: "application/pdf".to_string(),
            data: "UERG".to_string(),
        }]);
        let err = parse_generation(&response, ParsePolicy::default()).expect_err("pdf accepted");
        assert!(matches!(err, TryOnError::EmptyResponse));
    }

    #[tokio::test]
    async fn advice_sends_persona_and_context_and_needs_text() -> anyhow::Result<()> {
        let service = ScriptedService::new();
        service.push_ok(vec![ContentPart::text("Add **loafers**.")]);
        service.push_ok(vec![image_part("SU1H")]);
        let client = client(service.clone());

        let advice = client.advice(&person(), "make the jacket blue").await?;
        assert_eq!(advice, "Add **loafers**.");
        let requests = service.requests();
        let request = &requests[0];
        assert_eq!(request.modalities, vec![Modality::Text]);
        assert_eq!(
            request.system_instruction.as_deref(),
            Some(client.prompts().stylist_persona.as_str())
        );
        assert_eq!(request.parts[1].as_text(), Some("make the jacket blue"));

        let err = client.advice(&person(), "again").await.expect_err("image-only advice");
        assert!(matches!(err, TryOnError::NoAdviceProduced));
        Ok(())
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let service = ScriptedService::new();
        service.push(Err(TryOnError::RateLimited));
        let err = client(service)
            .composite(&person(), &garment())
            .await
            .expect_err("rate limit swallowed");
        assert!(matches!(err, TryOnError::RateLimited));
    }
}
