//! State machine for translating Cerebras streaming chunks into Ollama ndjson chunks.
//!
//! The [`StreamAdapter`] processes upstream `ChatCompletionChunk`s one at a time,
//! emitting one `done: false` chunk per non-empty fragment and exactly one
//! terminal `done: true` chunk carrying the aggregate metrics. A finish reason
//! is held until the upstream stream ends, because usage arrives in a trailing
//! chunk with no choices. After the terminal chunk every method returns nothing.

use bytes::Bytes;

use super::ollama_types::{timestamp_now, ChunkBody, EndpointKind, OutboundChunk};
use super::timing::{RequestTimer, TokenCounts};
use super::upstream_types::{ChatCompletionChunk, ChatUsage, TimeInfo};
use crate::error::{ErrorKind, Result};

/// Translates one upstream stream into Ollama chunks.
///
/// Usage:
///   let mut adapter = StreamAdapter::new(EndpointKind::Chat, &config.upstream.model, timer, prompt_tokens);
///   for chunk in upstream_chunks {
///       for out in adapter.process_chunk(&chunk) {
///           // write encode_line(&out)
///       }
///   }
///   // upstream ended
///   if let Some(last) = adapter.finish() { /* write it */ }
#[derive(Debug)]
pub struct StreamAdapter {
    kind: EndpointKind,
    model: String,
    timer: RequestTimer,
    prompt_tokens: u64,
    generated: String,
    usage: Option<ChatUsage>,
    time_info: Option<TimeInfo>,
    finish_reason: Option<String>,
    finished: bool,
}

impl StreamAdapter {
    pub fn new(kind: EndpointKind, model: &str, timer: RequestTimer, prompt_tokens: u64) -> Self {
        Self {
            kind,
            model: model.to_string(),
            timer,
            prompt_tokens,
            generated: String::new(),
            usage: None,
            time_info: None,
            finish_reason: None,
            finished: false,
        }
    }

    /// Process a single upstream chunk, returning the fragment chunk if it
    /// carries text. Usage and `time_info` are merged from every chunk; text
    /// after the finish reason is dropped.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<OutboundChunk> {
        if self.finished {
            return Vec::new();
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
        if let Some(info) = chunk.time_info {
            self.time_info = Some(info);
        }
        if self.finish_reason.is_some() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let fragment = chunk.content();
        if !fragment.is_empty() {
            self.timer.mark_fragment();
            self.generated.push_str(fragment);
            out.push(self.make_chunk(fragment));
        }
        if let Some(reason) = chunk.finish_reason() {
            self.finish_reason = Some(reason.to_string());
        }

        out
    }

    /// Call when the upstream stream ends (`[DONE]` or connection close).
    pub fn finish(&mut self) -> Option<OutboundChunk> {
        match self.finish_reason.take().as_deref() {
            Some("error") => self.terminal("error", Some(ErrorKind::UpstreamMalformed)),
            Some(reason) => self.terminal(&map_finish_reason(reason), None),
            None => self.terminal("stop", None),
        }
    }

    /// Call when the upstream stream fails mid-flight. A failure after the
    /// finish reason only cost the trailing usage, so the stream still ends
    /// normally.
    pub fn fail(&mut self, kind: ErrorKind) -> Option<OutboundChunk> {
        if self.finish_reason.is_some() {
            return self.finish();
        }
        self.terminal("error", Some(kind))
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Full text emitted so far.
    pub fn generated(&self) -> &str {
        &self.generated
    }

    pub fn counts(&self) -> TokenCounts {
        TokenCounts::resolve(self.usage, self.prompt_tokens, &self.generated)
    }

    pub fn timer(&self) -> &RequestTimer {
        &self.timer
    }

    fn make_chunk(&self, text: &str) -> OutboundChunk {
        OutboundChunk {
            model: self.model.clone(),
            created_at: timestamp_now(),
            body: ChunkBody::for_endpoint(self.kind, text),
            done: false,
            done_reason: None,
            context: None,
            metrics: None,
            error: None,
        }
    }

    fn terminal(&mut self, reason: &str, error: Option<ErrorKind>) -> Option<OutboundChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let mut chunk = self.make_chunk("");
        chunk.done = true;
        chunk.done_reason = Some(reason.to_string());
        if self.kind == EndpointKind::Generate {
            chunk.context = Some(Vec::new());
        }
        // partial counts are still meaningful on failure
        chunk.metrics = Some(self.timer.metrics(self.counts(), self.time_info));
        chunk.error = error.map(|k| k.client_message().to_string());
        Some(chunk)
    }
}

/// Map an upstream finish_reason to Ollama's `done_reason`.
pub fn map_finish_reason(reason: &str) -> String {
    match reason {
        "stop" | "content_filter" => "stop".to_string(),
        "length" => "length".to_string(),
        other => other.to_string(),
    }
}

/// Serialize one chunk as an ndjson record.
pub fn encode_line(chunk: &OutboundChunk) -> Result<Bytes> {
    let mut buf = serde_json::to_vec(chunk)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::upstream_types::*;

    fn text_chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "c1".to_string(),
            model: "qwen-3-235b-a22b-instruct-2507".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some(content.to_string()),
                },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
            time_info: None,
        }
    }

    fn adapter(kind: EndpointKind) -> StreamAdapter {
        let mut timer = RequestTimer::start();
        timer.mark_connected();
        StreamAdapter::new(kind, "qwen-3-235b-a22b-instruct-2507", timer, 2)
    }

    #[test]
    fn test_simple_chat_stream() {
        let mut adapter = adapter(EndpointKind::Chat);

        let out = adapter.process_chunk(&text_chunk("Hello", None));
        assert_eq!(out.len(), 1);
        assert!(!out[0].done);
        assert_eq!(out[0].fragment(), "Hello");

        // empty deltas (e.g. the role-only opener) emit nothing
        assert!(adapter.process_chunk(&text_chunk("", None)).is_empty());

        let out = adapter.process_chunk(&text_chunk(" world", Some("stop")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fragment(), " world");
        assert!(!out[0].done);
        assert!(!adapter.is_finished());

        let last = adapter.finish().unwrap();
        assert!(last.done);
        assert_eq!(last.done_reason.as_deref(), Some("stop"));

        let metrics = last.metrics.unwrap();
        assert_eq!(metrics.prompt_eval_count, Some(2));
        assert_eq!(metrics.eval_count, Some(2));
        assert_eq!(adapter.generated(), "Hello world");
    }

    #[test]
    fn test_exactly_one_terminal() {
        let mut adapter = adapter(EndpointKind::Generate);

        let out = adapter.process_chunk(&text_chunk("Hi", Some("length")));
        assert_eq!(out.len(), 1);
        assert!(adapter.process_chunk(&text_chunk("late", None)).is_empty());

        let last = adapter.finish().unwrap();
        assert!(last.done);
        assert_eq!(last.done_reason.as_deref(), Some("length"));
        assert_eq!(last.context, Some(Vec::new()));
        assert_eq!(adapter.generated(), "Hi");

        assert!(adapter.process_chunk(&text_chunk("later", None)).is_empty());
        assert!(adapter.finish().is_none());
        assert!(adapter.fail(ErrorKind::UpstreamUnreachable).is_none());
        assert!(adapter.is_finished());
    }

    #[test]
    fn test_trailing_usage_reaches_terminal() {
        let mut adapter = adapter(EndpointKind::Chat);
        let _ = adapter.process_chunk(&text_chunk("Hi", None));
        assert!(adapter.process_chunk(&text_chunk("", Some("stop"))).is_empty());

        let usage_only = ChatCompletionChunk {
            usage: Some(ChatUsage {
                prompt_tokens: 40,
                completion_tokens: 9,
                total_tokens: 49,
            }),
            ..ChatCompletionChunk::default()
        };
        assert!(adapter.process_chunk(&usage_only).is_empty());

        let metrics = adapter.finish().unwrap().metrics.unwrap();
        assert_eq!(metrics.prompt_eval_count, Some(40));
        assert_eq!(metrics.eval_count, Some(9));
    }

    #[test]
    fn test_failure_after_finish_reason_ends_normally() {
        let mut adapter = adapter(EndpointKind::Chat);
        let _ = adapter.process_chunk(&text_chunk("done", Some("stop")));

        let last = adapter.fail(ErrorKind::UpstreamTimeout).unwrap();
        assert_eq!(last.done_reason.as_deref(), Some("stop"));
        assert!(last.error.is_none());
    }

    #[test]
    fn test_error_finish_reason() {
        let mut adapter = adapter(EndpointKind::Chat);
        let _ = adapter.process_chunk(&text_chunk("", Some("error")));

        let last = adapter.finish().unwrap();
        assert_eq!(last.done_reason.as_deref(), Some("error"));
        assert_eq!(
            last.error.as_deref(),
            Some("inference backend returned an unreadable response")
        );
    }

    #[test]
    fn test_finish_without_chunks() {
        let mut adapter = adapter(EndpointKind::Chat);
        let last = adapter.finish().unwrap();
        assert!(last.done);
        assert_eq!(last.fragment(), "");
        assert_eq!(last.metrics.unwrap().eval_count, Some(0));
        assert!(last.error.is_none());
    }

    #[test]
    fn test_fail_mid_stream() {
        let mut adapter = adapter(EndpointKind::Chat);
        let _ = adapter.process_chunk(&text_chunk("partial answer", None));

        let last = adapter.fail(ErrorKind::UpstreamUnreachable).unwrap();
        assert!(last.done);
        assert_eq!(last.done_reason.as_deref(), Some("error"));
        assert_eq!(last.error.as_deref(), Some("inference backend is unreachable"));
        assert_eq!(last.metrics.unwrap().eval_count, Some(2));
    }

    #[test]
    fn test_upstream_usage_wins() {
        let mut adapter = adapter(EndpointKind::Chat);
        let mut chunk = text_chunk("a b c", Some("stop"));
        chunk.usage = Some(ChatUsage {
            prompt_tokens: 17,
            completion_tokens: 4,
            total_tokens: 21,
        });
        let _ = adapter.process_chunk(&chunk);
        let metrics = adapter.finish().unwrap().metrics.unwrap();
        assert_eq!(metrics.prompt_eval_count, Some(17));
        assert_eq!(metrics.eval_count, Some(4));
    }

    #[test]
    fn test_encode_line_is_newline_framed() {
        let mut adapter = adapter(EndpointKind::Generate);
        let out = adapter.process_chunk(&text_chunk("x", None));
        let line = encode_line(&out[0]).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);

        let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["response"], "x");
        assert_eq!(value["model"], "qwen-3-235b-a22b-instruct-2507");
    }
}
