use super::ollama_types::{timestamp_now, ChunkBody, EndpointKind, Metrics, OutboundChunk};
use super::streaming::map_finish_reason;
use super::timing::{RequestTimer, TokenCounts};
use super::upstream_types::ChatCompletionResponse;
use crate::error::ErrorKind;

/// Translate a whole upstream completion into a single Ollama reply.
/// Pure apart from the timestamp: timing comes from the caller's timer.
pub fn map_response(
    resp: &ChatCompletionResponse,
    kind: EndpointKind,
    model: &str,
    timer: &RequestTimer,
    prompt_tokens: u64,
) -> OutboundChunk {
    let text = resp.text();
    let counts = TokenCounts::resolve(resp.usage, prompt_tokens, text);
    let done_reason = resp
        .finish_reason()
        .map(map_finish_reason)
        .unwrap_or_else(|| "stop".to_string());

    OutboundChunk {
        model: model.to_string(),
        created_at: timestamp_now(),
        body: ChunkBody::for_endpoint(kind, text),
        done: true,
        done_reason: Some(done_reason),
        context: (kind == EndpointKind::Generate).then(Vec::new),
        metrics: Some(timer.metrics(counts, resp.time_info)),
        error: None,
    }
}

/// Ollama's reply to an empty prompt: the model is "loaded", nothing generated.
pub fn load_response(kind: EndpointKind, model: &str, timer: &RequestTimer) -> OutboundChunk {
    OutboundChunk {
        model: model.to_string(),
        created_at: timestamp_now(),
        body: ChunkBody::for_endpoint(kind, ""),
        done: true,
        done_reason: Some("load".to_string()),
        context: None,
        metrics: Some(Metrics {
            total_duration: timer.total_only().total_duration,
            load_duration: Some(0),
            ..Metrics::default()
        }),
        error: None,
    }
}

/// Downstream-shaped error object. Carries only the fixed message for `kind`
/// and the measured `total_duration`.
pub fn to_error_response(
    kind: ErrorKind,
    endpoint: EndpointKind,
    model: &str,
    timer: &RequestTimer,
) -> OutboundChunk {
    OutboundChunk {
        model: model.to_string(),
        created_at: timestamp_now(),
        body: ChunkBody::for_endpoint(endpoint, ""),
        done: true,
        done_reason: Some("error".to_string()),
        context: None,
        metrics: Some(timer.total_only()),
        error: Some(kind.client_message().to_string()),
    }
}
