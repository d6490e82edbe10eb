//! Sub-requests, per-item results and batch outcomes.

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::GenerationCall;
use crate::error::ErrorInfo;
use crate::story_schema::cinematic_story_schema;

/// Default model for chat requests
pub const FLASH_MODEL: &str = "gemini-2.5-flash";

/// Default model for structured requests
pub const LATEST_MODEL: &str = "gemini-2.5-pro";

/// Which product operation a sub-request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Chat,
    StructuredOutput,
    CinematicStory,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::StructuredOutput => "structured_output",
            RequestKind::CinematicStory => "cinematic_story",
        }
    }
}

/// Free-form chat
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub prompt: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

/// JSON output conforming to a caller-supplied schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutputPayload {
    pub user_content: Option<String>,
    pub system_prompt: Option<String>,
    pub json_schema: Option<Value>,
    pub model: Option<String>,
}

/// Story design using the built-in schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CinematicStoryPayload {
    pub user_content: Option<String>,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
}

/// Kind-specific parameters of one generation task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationPayload {
    Chat(ChatPayload),
    StructuredOutput(StructuredOutputPayload),
    CinematicStory(CinematicStoryPayload),
}

impl GenerationPayload {
    pub fn kind(&self) -> RequestKind {
        match self {
            GenerationPayload::Chat(_) => RequestKind::Chat,
            GenerationPayload::StructuredOutput(_) => RequestKind::StructuredOutput,
            GenerationPayload::CinematicStory(_) => RequestKind::CinematicStory,
        }
    }

    /// Validate the payload and turn it into a backend call.
    ///
    /// Structured kinds also return a compiled validator for the schema the
    /// output must satisfy.
    pub fn prepare(self) -> Result<PreparedCall, ErrorInfo> {
        match self {
            GenerationPayload::Chat(p) => {
                let [prompt] = require_fields([("prompt", p.prompt)])?;
                Ok(PreparedCall {
                    call: GenerationCall {
                        model: model_or(p.model, FLASH_MODEL),
                        system_prompt: p.system_prompt.filter(|s| !s.is_empty()),
                        content: prompt,
                        schema: None,
                    },
                    validator: None,
                })
            }
            GenerationPayload::StructuredOutput(p) => {
                let schema = p.json_schema.filter(|s| !is_blank(s));
                let [user_content, system_prompt, _] = require_fields([
                    ("user_content", p.user_content),
                    ("system_prompt", p.system_prompt),
                    ("json_schema", schema.as_ref().map(Value::to_string)),
                ])?;
                let Some(schema) = schema else {
                    return Err(ErrorInfo::invalid_request("Missing required field: json_schema"));
                };
                structured_call(user_content, system_prompt, schema, p.model)
            }
            GenerationPayload::CinematicStory(p) => {
                let [user_content, system_prompt] = require_fields([
                    ("user_content", p.user_content),
                    ("system_prompt", p.system_prompt),
                ])?;
                structured_call(user_content, system_prompt, cinematic_story_schema(), p.model)
            }
        }
    }
}

/// A validated backend call plus the validator for its output
pub struct PreparedCall {
    pub call: GenerationCall,
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("call", &self.call)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// One item of a batch, tagged with its input position
#[derive(Debug, Clone, PartialEq)]
pub struct SubRequest {
    pub index: usize,
    pub payload: GenerationPayload,
}

impl SubRequest {
    pub fn new(index: usize, payload: GenerationPayload) -> Self {
        Self { index, payload }
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }
}

/// Outcome of one sub-request. Exactly one of `value`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub index: usize,
    pub success: bool,
    pub value: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl ResultRecord {
    pub fn succeeded(index: usize, value: Value) -> Self {
        Self { index, success: true, value: Some(value), error: None }
    }

    pub fn failed(index: usize, error: ErrorInfo) -> Self {
        Self { index, success: false, value: None, error: Some(error) }
    }

    /// Unwrap into the value or the error
    pub fn into_result(self) -> Result<Value, ErrorInfo> {
        match (self.value, self.error) {
            (Some(value), None) if self.success => Ok(value),
            (_, Some(error)) => Err(error),
            _ => Err(ErrorInfo::backend("result record carried neither value nor error")),
        }
    }
}

/// Ordered results of a batch plus counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub results: Vec<ResultRecord>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    /// Assemble an outcome; records are ordered by their input index
    pub fn from_records(mut results: Vec<ResultRecord>) -> Self {
        results.sort_by_key(|r| r.index);
        let succeeded = results.iter().filter(|r| r.success).count();
        let total = results.len();

        Self { results, total, succeeded, failed: total - succeeded }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }
}

const STRUCTURED_INSTRUCTIONS: &str = "\
Answer with one JSON object that validates against the JSON Schema below. \
Output the object only: no prose, no explanations and no Markdown code fences.";

/// System prompt for structured calls: the caller's instructions followed by
/// the output contract and the pretty-printed schema.
pub fn structured_system_prompt(system_prompt: &str, schema: &Value) -> String {
    let rendered = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!("{}\n\n{}\n\nJSON Schema:\n{}\n", system_prompt, STRUCTURED_INSTRUCTIONS, rendered)
}

fn structured_call(
    user_content: String,
    system_prompt: String,
    schema: Value,
    model: Option<String>,
) -> Result<PreparedCall, ErrorInfo> {
    if !schema.is_object() {
        return Err(ErrorInfo::invalid_request("json_schema must be a JSON object"));
    }

    let validator = Validator::new(&schema)
        .map_err(|e| ErrorInfo::invalid_request(format!("json_schema is not a valid schema: {}", e)))?;

    Ok(PreparedCall {
        call: GenerationCall {
            model: model_or(model, LATEST_MODEL),
            system_prompt: Some(structured_system_prompt(&system_prompt, &schema)),
            content: user_content,
            schema: Some(schema),
        },
        validator: Some(validator),
    })
}

fn model_or(model: Option<String>, default: &str) -> String {
    model.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Check that every named field is present and non-empty, reporting all
/// missing fields at once.
fn require_fields<const N: usize>(
    fields: [(&'static str, Option<String>); N],
) -> Result<[String; N], ErrorInfo> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| *name)
        .collect();

    if !missing.is_empty() {
        let noun = if missing.len() == 1 { "field" } else { "fields" };
        return Err(ErrorInfo::invalid_request(format!(
            "Missing required {}: {}",
            noun,
            missing.join(", ")
        )));
    }

    Ok(fields.map(|(_, value)| value.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn chat(prompt: &str) -> GenerationPayload {
        GenerationPayload::Chat(ChatPayload { prompt: Some(prompt.to_string()), ..Default::default() })
    }

    #[test]
    fn test_payload_deserializes_by_kind() {
        let payload: GenerationPayload = serde_json::from_value(json!({
            "kind": "structured_output",
            "user_content": "Ada Lovelace, 1815",
            "system_prompt": "Extract",
            "json_schema": {"type": "object"}
        }))
        .unwrap();

        assert_eq!(payload.kind(), RequestKind::StructuredOutput);
    }

    #[test]
    fn test_chat_defaults() {
        let prepared = chat("hello").prepare().unwrap();
        assert_eq!(prepared.call.model, FLASH_MODEL);
        assert_eq!(prepared.call.content, "hello");
        assert!(prepared.call.system_prompt.is_none());
        assert!(!prepared.call.is_structured());
        assert!(prepared.validator.is_none());
    }

    #[test]
    fn test_chat_missing_prompt() {
        let err = chat("").prepare().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.message, "Missing required field: prompt");
    }

    #[test]
    fn test_structured_reports_all_missing_fields() {
        let payload = GenerationPayload::StructuredOutput(StructuredOutputPayload {
            user_content: Some("text".to_string()),
            ..Default::default()
        });

        let err = payload.prepare().unwrap_err();
        assert_eq!(err.message, "Missing required fields: system_prompt, json_schema");
    }

    #[test]
    fn test_structured_rejects_invalid_schema() {
        let payload = GenerationPayload::StructuredOutput(StructuredOutputPayload {
            user_content: Some("text".to_string()),
            system_prompt: Some("extract".to_string()),
            json_schema: Some(json!({"type": "not-a-type"})),
            model: None,
        });

        let err = payload.prepare().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(err.message.starts_with("json_schema is not a valid schema"));

        let payload = GenerationPayload::StructuredOutput(StructuredOutputPayload {
            user_content: Some("text".to_string()),
            system_prompt: Some("extract".to_string()),
            json_schema: Some(json!([1, 2])),
            model: None,
        });
        assert_eq!(payload.prepare().unwrap_err().message, "json_schema must be a JSON object");
    }

    #[test]
    fn test_structured_prompt_embeds_schema() {
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let payload = GenerationPayload::StructuredOutput(StructuredOutputPayload {
            user_content: Some("Grace Hopper".to_string()),
            system_prompt: Some("Extract the person".to_string()),
            json_schema: Some(schema.clone()),
            model: Some("gemini-2.5-flash".to_string()),
        });

        let prepared = payload.prepare().unwrap();
        let system = prepared.call.system_prompt.unwrap();
        assert!(system.starts_with("Extract the person\n\n"));
        assert!(system.contains("\"name\""));
        assert_eq!(prepared.call.model, "gemini-2.5-flash");
        assert_eq!(prepared.call.schema, Some(schema));
        assert!(prepared.validator.is_some());
    }

    #[test]
    fn test_cinematic_story_uses_builtin_schema() {
        let payload = GenerationPayload::CinematicStory(CinematicStoryPayload {
            user_content: Some("Once upon a time".to_string()),
            system_prompt: Some("Design the story".to_string()),
            model: Some("  ".to_string()),
        });

        let prepared = payload.prepare().unwrap();
        assert_eq!(prepared.call.model, LATEST_MODEL);
        assert_eq!(prepared.call.schema, Some(cinematic_story_schema()));
    }

    #[test]
    fn test_batch_outcome_orders_and_counts() {
        let outcome = BatchOutcome::from_records(vec![
            ResultRecord::failed(2, ErrorInfo::timeout("slow")),
            ResultRecord::succeeded(0, json!("a")),
            ResultRecord::succeeded(1, json!("b")),
        ]);

        let indices: Vec<usize> = outcome.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failed, 1);

        let empty = BatchOutcome::empty();
        assert_eq!((empty.total, empty.succeeded, empty.failed), (0, 0, 0));
    }

    #[test]
    fn test_result_record_serialization() {
        let value = serde_json::to_value(ResultRecord::failed(3, ErrorInfo::backend("boom"))).unwrap();
        assert_eq!(
            value,
            json!({
                "index": 3,
                "success": false,
                "value": null,
                "error": {"kind": "backend_error", "message": "boom"}
            })
        );

        let record = ResultRecord::succeeded(0, json!({"ok": true}));
        assert_eq!(record.into_result().unwrap(), json!({"ok": true}));
    }
}
