//! Type definitions for the Ollama-style API we expose to clients.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// RFC 3339 UTC timestamp in the form Ollama emits for `created_at`.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// Request types (what clients send TO us)
// ---------------------------------------------------------------------------

/// Body of `POST /api/chat` and `POST /api/generate`.
///
/// Chat requests use `messages`, generate requests use `prompt` (and
/// optionally `system`). `model` is accepted but never used for routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundRequest {
    #[serde(default)]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Map<String, Value>>,
    // format, keep_alive, context, images, ... are accepted and ignored
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundRequest {
    /// Ollama streams unless told otherwise.
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Which inbound endpoint a request arrived on; decides the outbound body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Chat,
    Generate,
}

// ---------------------------------------------------------------------------
// Response types (what we send back)
// ---------------------------------------------------------------------------

/// One outbound object: a streamed chunk, the terminal chunk, or a whole
/// non-streaming reply. The terminal/whole form carries `done: true` and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundChunk {
    pub model: String,
    pub created_at: String,
    #[serde(flatten)]
    pub body: ChunkBody,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(flatten)]
    pub metrics: Option<Metrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundChunk {
    /// Text carried by this chunk, regardless of endpoint shape.
    pub fn fragment(&self) -> &str {
        match &self.body {
            ChunkBody::Message { message } => &message.content,
            ChunkBody::Response { response } => response,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChunkBody {
    Message { message: Message },
    Response { response: String },
}

impl ChunkBody {
    pub fn for_endpoint(kind: EndpointKind, text: impl Into<String>) -> Self {
        match kind {
            EndpointKind::Chat => Self::Message {
                message: Message::assistant(text),
            },
            EndpointKind::Generate => Self::Response {
                response: text.into(),
            },
        }
    }
}

/// Aggregate timing and count fields, all nanoseconds or token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

// ---------------------------------------------------------------------------
// Model listing types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetails {
    pub parent_model: String,
    pub format: String,
    pub family: String,
    pub families: Vec<String>,
    pub parameter_size: String,
    pub quantization_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsModel {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagsResponse {
    pub models: Vec<TagsModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningModel {
    pub name: String,
    pub model: String,
    pub size: u64,
    pub digest: String,
    pub details: ModelDetails,
    pub expires_at: String,
    pub size_vram: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsResponse {
    pub models: Vec<RunningModel>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowRequest {
    #[serde(default, alias = "name")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowResponse {
    pub license: String,
    pub modelfile: String,
    pub parameters: String,
    pub template: String,
    pub details: ModelDetails,
    pub model_info: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_defaults_to_true() {
        let req: InboundRequest =
            serde_json::from_str(r#"{"model":"qwen","prompt":"hi"}"#).unwrap();
        assert!(req.is_streaming());

        let req: InboundRequest =
            serde_json::from_str(r#"{"model":"qwen","prompt":"hi","stream":false}"#).unwrap();
        assert!(!req.is_streaming());
    }

    #[test]
    fn test_chat_chunk_shape() {
        let chunk = OutboundChunk {
            model: "qwen-3-235b-a22b-instruct-2507".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            body: ChunkBody::for_endpoint(EndpointKind::Chat, "Hel"),
            done: false,
            done_reason: None,
            context: None,
            metrics: None,
            error: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["message"]["role"], "assistant");
        assert_eq!(json["message"]["content"], "Hel");
        assert_eq!(json["done"], false);
        assert!(json.get("total_duration").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_terminal_generate_shape() {
        let chunk = OutboundChunk {
            model: "qwen-3-235b-a22b-instruct-2507".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            body: ChunkBody::for_endpoint(EndpointKind::Generate, ""),
            done: true,
            done_reason: Some("stop".to_string()),
            context: Some(Vec::new()),
            metrics: Some(Metrics {
                total_duration: 10,
                eval_count: Some(2),
                ..Metrics::default()
            }),
            error: None,
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["response"], "");
        assert_eq!(json["done"], true);
        assert_eq!(json["total_duration"], 10);
        assert_eq!(json["eval_count"], 2);
        assert!(json.get("message").is_none());
    }
}
