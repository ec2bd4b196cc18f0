//! Translate Ollama chat/generate requests into Cerebras chat completions requests.
//!
//! The upstream model always comes from configuration. Ollama `options` are
//! mapped by name where the upstream has an equivalent; everything else is
//! forwarded untouched.

use serde_json::{Map, Value};

use super::ollama_types::{EndpointKind, InboundRequest};
use super::upstream_types::{ChatCompletionRequest, ChatMessage, StreamOptions};
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

/// Keys a client must not be able to override through `options`.
const RESERVED_KEYS: &[&str] = &["model", "messages", "stream", "stream_options"];

/// Translate an inbound request into the upstream request shape.
pub fn map_inbound(
    req: &InboundRequest,
    kind: EndpointKind,
    config: &ProxyConfig,
) -> Result<ChatCompletionRequest> {
    let messages = match kind {
        EndpointKind::Chat => chat_messages(req)?,
        EndpointKind::Generate => generate_messages(req)?,
    };

    let stream = req.is_streaming();
    let mut options = req.options.clone().unwrap_or_default();
    let defaults = &config.generation;

    let max_completion_tokens = take_u64(&mut options, "num_predict").or(defaults.max_completion_tokens);
    let temperature = take_f64(&mut options, "temperature").or(defaults.temperature);
    let top_p = take_f64(&mut options, "top_p").or(defaults.top_p);
    let stop = take_stop(&mut options);
    let seed = take_i64(&mut options, "seed");

    for key in RESERVED_KEYS {
        if options.remove(*key).is_some() {
            tracing::debug!(key, "Dropping reserved key from options");
        }
    }

    Ok(ChatCompletionRequest {
        model: config.upstream.model.clone(),
        messages,
        stream,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        max_completion_tokens,
        temperature,
        top_p,
        stop,
        seed,
        passthrough: options,
    })
}

/// An empty or absent prompt or message list is Ollama's "load the model"
/// request: answered locally, never sent upstream.
pub fn is_load_request(req: &InboundRequest, kind: EndpointKind) -> bool {
    match kind {
        EndpointKind::Chat => req.messages.as_deref().unwrap_or_default().is_empty(),
        EndpointKind::Generate => req.prompt.as_deref().unwrap_or("").is_empty(),
    }
}

fn chat_messages(req: &InboundRequest) -> Result<Vec<ChatMessage>> {
    let messages = req
        .messages
        .as_ref()
        .ok_or_else(|| ProxyError::invalid_request("chat request is missing 'messages'"))?;

    Ok(messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect())
}

fn generate_messages(req: &InboundRequest) -> Result<Vec<ChatMessage>> {
    let prompt = req
        .prompt
        .as_ref()
        .ok_or_else(|| ProxyError::invalid_request("generate request is missing 'prompt'"))?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = req.system.as_ref().filter(|s| !s.is_empty()) {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.push(ChatMessage {
        role: "user".to_string(),
        content: prompt.clone(),
    });
    Ok(messages)
}

// A recognised key with an unexpected type stays in the map and is forwarded raw.

fn take_f64(options: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let value = options.get(key)?.as_f64()?;
    options.remove(key);
    Some(value)
}

fn take_i64(options: &mut Map<String, Value>, key: &str) -> Option<i64> {
    let value = options.get(key)?.as_i64()?;
    options.remove(key);
    Some(value)
}

fn take_u64(options: &mut Map<String, Value>, key: &str) -> Option<u64> {
    let value = options.get(key)?.as_i64()?;
    options.remove(key);
    // -1 (infinite) and -2 (fill context) mean "no explicit limit"
    u64::try_from(value).ok().filter(|v| *v > 0)
}

fn take_stop(options: &mut Map<String, Value>) -> Option<Vec<String>> {
    let stop = match options.get("stop")? {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            let strings: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect();
            strings?
        }
        _ => return None,
    };
    options.remove("stop");
    (!stop.is_empty()).then_some(stop)
}
