//! Upstream client for the Gemini REST API.
//!
//! Implements the core's `GenerativeBackend` over `reqwest`, classifying
//! Gemini failures into the gateway's error kinds.

use std::time::Duration;

use async_trait::async_trait;
use gemgate_core::backend::parse_structured_text;
use gemgate_core::{BackendError, Credential, GenerationCall, GenerationOutput, GenerativeBackend};
use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, instrument, warn};

use crate::types::gemini::{
    ApiErrorEnvelope, Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
};

/// Header carrying the Gemini API key
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Temperature for structured output
const STRUCTURED_TEMPERATURE: f32 = 0.1;

/// Longest upstream body quoted in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Gemini REST client
#[derive(Clone)]
pub struct GeminiClient {
    /// HTTP client
    client: Client,
    /// Gemini base URL, without trailing slash
    base_url: String,
}

impl GeminiClient {
    /// Create a new client with the given per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(url = %base_url, timeout_secs = timeout.as_secs(), "Creating Gemini client");

        Ok(Self { client: Client::builder().timeout(timeout).build()?, base_url })
    }

    /// Get the Gemini base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the generateContent method for `model`
    ///
    /// The model becomes one path segment, so it is limited to ASCII
    /// letters, digits, `-`, `_` and `.`.
    pub fn endpoint(&self, model: &str) -> Result<String, BackendError> {
        let valid = !model.is_empty()
            && model.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !valid || model.chars().all(|c| c == '.') {
            return Err(BackendError::InvalidRequest(format!("invalid model name '{}'", model)));
        }
        Ok(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
    }

    /// Build the wire request for a call
    pub fn build_request(call: &GenerationCall) -> GenerateContentRequest {
        let generation_config = call.is_structured().then(|| GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            temperature: Some(STRUCTURED_TEMPERATURE),
        });

        GenerateContentRequest {
            system_instruction: call.system_prompt.as_deref().map(Content::system),
            contents: vec![Content::user(call.content.as_str())],
            generation_config,
        }
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    #[instrument(skip(self, credential, call), fields(model = %call.model, structured = call.is_structured()))]
    async fn generate(
        &self,
        credential: &Credential,
        call: &GenerationCall,
    ) -> Result<GenerationOutput, BackendError> {
        let url = self.endpoint(&call.model)?;
        debug!(url = %url, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, credential.api_key())
            .json(&Self::build_request(call))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status, &body);
            error!(status = %status, kind = %err.kind(), "Gemini returned error");
            return Err(err);
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::upstream(format!("malformed Gemini response: {}", e)))?;

        if let Some(usage) = &result.usage_metadata {
            debug!(tokens = ?usage.total_token_count, "Generation complete");
        }

        let Some(text) = result.text() else {
            let reason = result.block_reason().unwrap_or("no candidates");
            warn!(reason, "Gemini returned no text");
            return Err(BackendError::upstream(format!("Gemini returned no text ({})", reason)));
        };

        if call.is_structured() {
            Ok(GenerationOutput::Structured(parse_structured_text(&text)?))
        } else {
            Ok(GenerationOutput::Text(text))
        }
    }
}

/// Classify a non-success Gemini response
pub fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let envelope = serde_json::from_str::<ApiErrorEnvelope>(body).ok();
    let message = match &envelope {
        Some(envelope) if !envelope.error.message.is_empty() => envelope.error.message.clone(),
        _ => truncate(body),
    };
    let message = format!("Gemini returned status {}: {}", status.as_u16(), message);
    let key_invalid = envelope.as_ref().is_some_and(|e| e.error.has_reason("API_KEY_INVALID"));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Unauthorized(message),
        StatusCode::BAD_REQUEST if key_invalid => BackendError::Unauthorized(message),
        StatusCode::BAD_REQUEST => BackendError::InvalidRequest(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout(message),
        _ => BackendError::Upstream(message),
    }
}

fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(format!("Gemini request timed out: {}", err))
    } else {
        BackendError::upstream(format!("Failed to reach Gemini: {}", err))
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    out.push('…');
    out
}
