use async_trait::async_trait;
use tryon_contracts::{EncodedImage, TryOnResult};

/// One unit of a request or response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    InlineData { mime_type: String, data: String },
    Text(String),
}

impl ContentPart {
    pub fn image(image: &EncodedImage) -> Self {
        Self::InlineData {
            mime_type: image.mime_type().to_string(),
            data: image.base64().to_string(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::InlineData { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Image,
    Text,
}

impl Modality {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Image => "IMAGE",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub modalities: Vec<Modality>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateResponse {
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    pub fn single(parts: Vec<ContentPart>) -> Self {
        Self {
            candidates: vec![Candidate { parts }],
        }
    }
}

/// The hosted model endpoint: ordered parts in, candidates out.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerateRequest) -> TryOnResult<GenerateResponse>;
}

#[async_trait]
impl<T: GenerativeService + ?Sized> GenerativeService for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerateRequest) -> TryOnResult<GenerateResponse> {
        (**self).generate(request).await
    }
}
