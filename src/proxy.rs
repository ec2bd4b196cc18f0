use crate::error::{ErrorKind, Result};
use crate::translate::ollama_types::{EndpointKind, OutboundChunk};
use crate::translate::response::map_response;
use crate::translate::streaming::{encode_line, StreamAdapter};
use crate::translate::timing::{approximate_tokens, RequestTimer, TokenCounts};
use crate::translate::upstream_types::ChatCompletionRequest;
use crate::upstream::{UpstreamClient, UpstreamStream};

use bytes::Bytes;
use futures::StreamExt;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Body stream of a streaming reply: ndjson lines, one per outbound chunk.
pub type NdjsonStream = ReceiverStream<std::result::Result<Bytes, Infallible>>;

/// Identity of one chat/generate request, carried into its log events.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo {
    pub request_id: Uuid,
    pub endpoint: EndpointKind,
    pub streamed: bool,
}

impl RequestInfo {
    pub fn new(endpoint: EndpointKind, streamed: bool) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint,
            streamed,
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed { done_reason: String },
    Failed { error: ErrorKind },
    Cancelled,
}

/// Emit the structured event that closes a request. Never includes
/// message content.
pub fn log_outcome(info: &RequestInfo, outcome: &Outcome, counts: TokenCounts, total_duration: u64) {
    match outcome {
        Outcome::Completed { done_reason } => tracing::info!(
            request_id = %info.request_id,
            endpoint = ?info.endpoint,
            streamed = info.streamed,
            %done_reason,
            prompt_eval_count = counts.prompt,
            eval_count = counts.eval,
            total_duration,
            "Request completed"
        ),
        Outcome::Failed { error } => tracing::warn!(
            request_id = %info.request_id,
            endpoint = ?info.endpoint,
            streamed = info.streamed,
            kind = ?error,
            prompt_eval_count = counts.prompt,
            eval_count = counts.eval,
            total_duration,
            "Request failed"
        ),
        Outcome::Cancelled => tracing::info!(
            request_id = %info.request_id,
            endpoint = ?info.endpoint,
            kind = ?ErrorKind::ClientDisconnected,
            eval_count = counts.eval,
            total_duration,
            "Client went away, upstream stream cancelled"
        ),
    }
}

/// Per-request values shared by both reply modes.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub info: RequestInfo,
    pub kind: EndpointKind,
    /// Downstream-visible model name.
    pub model: String,
    pub prompt_tokens: u64,
}

impl Exchange {
    pub fn new(info: RequestInfo, model: String, upstream_req: &ChatCompletionRequest) -> Self {
        let prompt_tokens = upstream_req
            .messages
            .iter()
            .map(|m| approximate_tokens(&m.content))
            .sum();
        Self {
            kind: info.endpoint,
            info,
            model,
            prompt_tokens,
        }
    }
}

/// Forward a non-streaming request and translate the whole reply.
pub async fn proxy_whole(
    upstream: &UpstreamClient,
    upstream_req: &ChatCompletionRequest,
    exchange: &Exchange,
    timer: &mut RequestTimer,
) -> Result<OutboundChunk> {
    let resp = upstream.complete(upstream_req, timer).await?;
    let reply = map_response(&resp, exchange.kind, &exchange.model, timer, exchange.prompt_tokens);

    let metrics = reply.metrics.unwrap_or_default();
    log_outcome(
        &exchange.info,
        &Outcome::Completed {
            done_reason: reply.done_reason.clone().unwrap_or_default(),
        },
        TokenCounts {
            prompt: metrics.prompt_eval_count.unwrap_or_default(),
            eval: metrics.eval_count.unwrap_or_default(),
        },
        metrics.total_duration,
    );

    Ok(reply)
}

/// Open the upstream stream and start pumping it into an ndjson body.
///
/// Errors before the first upstream byte are returned so the caller can
/// answer with a status code; later failures become an error terminal chunk.
pub async fn proxy_streaming(
    upstream: &UpstreamClient,
    upstream_req: &ChatCompletionRequest,
    exchange: Exchange,
    mut timer: RequestTimer,
) -> Result<NdjsonStream> {
    let stream = upstream.stream(upstream_req, &mut timer).await?;
    let adapter = StreamAdapter::new(exchange.kind, &exchange.model, timer, exchange.prompt_tokens);

    // capacity 1: at most one encoded line waits on a slow client
    let (tx, rx) = mpsc::channel(1);
    spawn_pump(stream, adapter, tx, exchange.info);

    Ok(ReceiverStream::new(rx))
}

/// Drive one upstream stream through the adapter into the client channel.
///
/// Reads until the upstream stream ends, so usage sent after the finish
/// reason still reaches the terminal chunk. Stops early as soon as the
/// client side of the channel is dropped. Either way the upstream stream is
/// dropped on return, which closes its connection.
pub fn spawn_pump(
    mut stream: UpstreamStream,
    mut adapter: StreamAdapter,
    tx: mpsc::Sender<std::result::Result<Bytes, Infallible>>,
    info: RequestInfo,
) -> JoinHandle<Outcome> {
    tokio::spawn(async move {
        let mut outcome = None;
        let mut failure = None;

        'pump: while !adapter.is_finished() {
            let next = tokio::select! {
                biased;
                () = tx.closed() => None,
                item = stream.next() => Some(item),
            };
            let Some(item) = next else {
                outcome = Some(Outcome::Cancelled);
                break;
            };

            let chunks: Vec<OutboundChunk> = match item {
                Some(Ok(chunk)) => adapter.process_chunk(&chunk),
                Some(Err(e)) => {
                    tracing::warn!(request_id = %info.request_id, error = %e, "Upstream stream failed");
                    failure = Some(e.kind());
                    adapter.fail(e.kind()).into_iter().collect()
                }
                None => adapter.finish().into_iter().collect(),
            };

            for chunk in chunks {
                if chunk.done {
                    outcome = Some(match chunk.error {
                        Some(_) => Outcome::Failed {
                            error: failure.unwrap_or(ErrorKind::UpstreamMalformed),
                        },
                        None => Outcome::Completed {
                            done_reason: chunk.done_reason.clone().unwrap_or_default(),
                        },
                    });
                }
                let line = match encode_line(&chunk) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode chunk");
                        continue;
                    }
                };
                if tx.send(Ok(line)).await.is_err() {
                    outcome = Some(Outcome::Cancelled);
                    break 'pump;
                }
            }
        }
        drop(stream);

        let outcome = outcome.unwrap_or(Outcome::Cancelled);
        let total = adapter.timer().total_only().total_duration;
        log_outcome(&info, &outcome, adapter.counts(), total);
        outcome
    })
}
