//! The generative backend seam.
//!
//! The gateway never talks to a vendor API directly from the core; it calls a
//! [`GenerativeBackend`]. The HTTP adapter lives in `gemgate-proxy`, tests use
//! in-process fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::credential::Credential;
use crate::error::BackendError;

/// One generation task, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationCall {
    pub model: String,
    /// System instruction, if any
    pub system_prompt: Option<String>,
    /// User content
    pub content: String,
    /// When set, the backend must answer with JSON conforming to this schema
    pub schema: Option<Value>,
}

impl GenerationCall {
    pub fn is_structured(&self) -> bool {
        self.schema.is_some()
    }
}

/// What the backend produced
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutput {
    Text(String),
    Structured(Value),
}

impl GenerationOutput {
    pub fn into_value(self) -> Value {
        match self {
            GenerationOutput::Text(text) => Value::String(text),
            GenerationOutput::Structured(value) => value,
        }
    }
}

/// A rate-limited, pay-per-call generation capability
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Run one generation with the given credential.
    ///
    /// Implementations return [`GenerationOutput::Structured`] when
    /// `call.schema` is set and [`GenerationOutput::Text`] otherwise.
    async fn generate(
        &self,
        credential: &Credential,
        call: &GenerationCall,
    ) -> Result<GenerationOutput, BackendError>;
}

/// Parse model text that should contain a single JSON value.
///
/// Models sometimes wrap JSON in a Markdown code fence even when asked not
/// to; a leading ```` ```json ```` or ```` ``` ```` fence and its closing
/// fence are stripped before parsing.
pub fn parse_structured_text(text: &str) -> Result<Value, BackendError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(BackendError::upstream("empty response from backend"));
    }

    let unfenced = strip_code_fence(trimmed);
    serde_json::from_str(unfenced)
        .map_err(|e| BackendError::upstream(format!("response is not valid JSON: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let body = if let Some(rest) = text.strip_prefix("```json") {
        rest
    } else if let Some(rest) = text.strip_prefix("```") {
        rest
    } else {
        return text;
    };

    let body = body.trim();
    body.strip_suffix("```").map(str::trim).unwrap_or(body)
}
