//! Request and response bodies of the gateway's own HTTP API.

use std::collections::BTreeMap;

use gemgate_core::{
    ChatPayload, CinematicStoryPayload, ErrorInfo, GateError, GateSnapshot, GenerationPayload,
    StructuredOutputPayload,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied backend credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, alias = "gemini_api_key")]
    pub api_key: Option<String>,
}

/// Body of the individual generation endpoints: optional credentials plus
/// the kind-specific payload fields at the top level
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateRequest<P> {
    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(flatten)]
    pub payload: P,
}

/// POST /chat
pub type ChatRequest = GenerateRequest<ChatPayload>;

/// POST /structured-output
pub type StructuredOutputRequest = GenerateRequest<StructuredOutputPayload>;

/// POST /cinematic-story-design
pub type CinematicStoryRequest = GenerateRequest<CinematicStoryPayload>;

/// Success body of the individual generation endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub data: Value,
}

impl GenerateResponse {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data }
    }
}

/// POST /batch
///
/// Items are kept as raw JSON so a malformed item fails on its own instead
/// of rejecting the whole batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub requests: Vec<Value>,

    #[serde(default)]
    pub credentials: Option<Credentials>,

    #[serde(default)]
    pub external_semaphore_id: Option<String>,
}

impl BatchRequest {
    pub fn api_key(&self) -> Option<&str> {
        self.credentials.as_ref().and_then(|c| c.api_key.as_deref())
    }

    /// Decode every item; failures stay in place as `InvalidRequest`
    pub fn decode_items(self) -> Vec<Result<GenerationPayload, ErrorInfo>> {
        self.requests.into_iter().map(decode_item).collect()
    }
}

fn decode_item(item: Value) -> Result<GenerationPayload, ErrorInfo> {
    if item.get("kind").and_then(Value::as_str).is_none() {
        return Err(ErrorInfo::invalid_request("Missing required field: kind"));
    }
    serde_json::from_value(item)
        .map_err(|e| ErrorInfo::invalid_request(format!("Invalid request item: {}", e)))
}

/// POST /admin/semaphores
///
/// `limit` is signed so that a negative value reaches capacity validation
/// instead of failing to decode.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterGateRequest {
    pub semaphore_id: String,
    pub limit: i64,
}

impl RegisterGateRequest {
    /// The requested capacity, if it is at least 1
    pub fn capacity(&self) -> Result<usize, GateError> {
        usize::try_from(self.limit)
            .ok()
            .filter(|capacity| *capacity >= 1)
            .ok_or_else(|| GateError::invalid_capacity(self.semaphore_id.as_str(), self.limit))
    }
}

/// Admin view of every gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesResponse {
    pub semaphores: BTreeMap<String, GateView>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateView {
    pub capacity: usize,
    pub held: usize,
}

impl From<GateSnapshot> for GateView {
    fn from(snapshot: GateSnapshot) -> Self {
        Self { capacity: snapshot.capacity, held: snapshot.held }
    }
}

impl GatesResponse {
    pub fn from_snapshot(snapshot: BTreeMap<String, GateSnapshot>) -> Self {
        Self { semaphores: snapshot.into_iter().map(|(id, s)| (id, s.into())).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemgate_core::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_chat_request_flattens_payload() {
        let request: ChatRequest = serde_json::from_value(json!({
            "credentials": {"gemini_api_key": "user-key"},
            "prompt": "Hi",
            "model": "gemini-2.5-flash"
        }))
        .unwrap();

        assert_eq!(request.credentials.unwrap().api_key.as_deref(), Some("user-key"));
        assert_eq!(request.payload.prompt.as_deref(), Some("Hi"));
        assert_eq!(request.payload.system_prompt, None);
    }

    #[test]
    fn test_request_without_credentials() {
        let request: StructuredOutputRequest = serde_json::from_value(json!({
            "user_content": "Ada",
            "system_prompt": "Extract",
            "json_schema": {"type": "object"}
        }))
        .unwrap();

        assert!(request.credentials.is_none());
        assert_eq!(request.payload.json_schema, Some(json!({"type": "object"})));
    }

    #[test]
    fn test_batch_items_decode_in_place() {
        let request: BatchRequest = serde_json::from_value(json!({
            "credentials": {"api_key": "k"},
            "external_semaphore_id": "tenant-a",
            "requests": [
                {"kind": "chat", "prompt": "one"},
                {"kind": "poem", "prompt": "two"},
                {"prompt": "three"},
                {"kind": "cinematic_story", "user_content": "u", "system_prompt": "s"}
            ]
        }))
        .unwrap();

        assert_eq!(request.api_key(), Some("k"));
        assert_eq!(request.external_semaphore_id.as_deref(), Some("tenant-a"));

        let items = request.decode_items();
        assert_eq!(items.len(), 4);
        assert!(items[0].is_ok());
        assert_eq!(items[1].as_ref().unwrap_err().kind, ErrorKind::InvalidRequest);
        assert_eq!(
            items[2].as_ref().unwrap_err().message,
            "Missing required field: kind"
        );
        assert!(items[3].is_ok());
    }
}
