use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use tracing::debug;
use tryon_contracts::{TryOnError, TryOnResult};

use crate::gemini_types::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part,
};
use crate::service::{Candidate, ContentPart, GenerateRequest, GenerateResponse, GenerativeService};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// `generateContent` over HTTPS with the key passed as a query parameter.
pub struct GeminiService {
    api_base: String,
    api_key: String,
    http: HttpClient,
    timeout: Duration,
}

impl GeminiService {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: HttpClient::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads the credential and optional `GEMINI_API_BASE` from the process
    /// environment. A missing credential is fatal.
    pub fn from_env() -> TryOnResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> TryOnResult<Self> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let api_key = API_KEY_VARS
            .iter()
            .find_map(|key| non_empty(key))
            .ok_or_else(|| TryOnError::MissingCredential(API_KEY_VARS.join(" or ")))?;
        let api_base = non_empty("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Ok(Self::new(api_base, api_key))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

#[async_trait]
impl GenerativeService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerateRequest) -> TryOnResult<GenerateResponse> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = build_payload(request);
        debug!(
            endpoint = %endpoint,
            parts = request.parts.len(),
            persona = request.system_instruction.is_some(),
            "sending generateContent request"
        );

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                TryOnError::Transport(format!("Gemini request failed: {}", err.without_url()))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            TryOnError::Transport(format!(
                "Gemini response body read failed: {}",
                err.without_url()
            ))
        })?;
        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|err| {
            TryOnError::Transport(format!("Gemini returned invalid JSON payload: {err}"))
        })?;
        if let Some(error) = parsed.error {
            if error.status.as_deref() == Some("RESOURCE_EXHAUSTED") {
                return Err(TryOnError::RateLimited);
            }
            return Err(TryOnError::Transport(format!(
                "Gemini reported an error: {}",
                error.message
            )));
        }
        Ok(convert_response(parsed))
    }
}

fn build_payload(request: &GenerateRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: request.parts.iter().map(wire_part).collect(),
        }],
        system_instruction: request.system_instruction.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part {
                text: Some(text.clone()),
                inline_data: None,
            }],
        }),
        generation_config: GenerationConfig {
            response_modalities: request
                .modalities
                .iter()
                .map(|modality| modality.wire_name().to_string())
                .collect(),
        },
    }
}

fn wire_part(part: &ContentPart) -> Part {
    match part {
        ContentPart::InlineData { mime_type, data } => Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.clone(),
                data: data.clone(),
            }),
        },
        ContentPart::Text(text) => Part {
            text: Some(text.clone()),
            inline_data: None,
        },
    }
}

fn convert_response(response: GenerateContentResponse) -> GenerateResponse {
    let candidates = response
        .candidates
        .unwrap_or_default()
        .into_iter()
        .map(|candidate| {
            if let Some(reason) = candidate.finish_reason.as_deref() {
                debug!(finish_reason = reason, "Gemini candidate finished");
            }
            let parts = candidate
                .content
                .map(|content| content.parts)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|part| {
                    if let Some(inline) = part.inline_data.filter(|inline| !inline.data.is_empty())
                    {
                        return Some(ContentPart::InlineData {
                            mime_type: inline.mime_type,
                            data: inline.data,
                        });
                    }
                    part.text.map(ContentPart::Text)
                })
                .collect();
            Candidate { parts }
        })
        .collect();
    GenerateResponse { candidates }
}

fn classify_failure(status: StatusCode, body: &str) -> TryOnError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return TryOnError::RateLimited;
    }
    TryOnError::Transport(format!(
        "Gemini request failed ({}): {}",
        status.as_u16(),
        truncate_text(body, 512)
    ))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
