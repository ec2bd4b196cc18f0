//! HTTP client for the Cerebras chat completions endpoint.
//!
//! Every failure leaves this module as a classified [`ProxyError`]; raw
//! upstream bodies are logged here and go no further.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::timing::RequestTimer;
use crate::translate::upstream_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse,
};

/// Lazy, single-pass sequence of upstream chunks. Ends after `[DONE]`, on
/// connection close, or right after yielding an error. Dropping it closes
/// the upstream connection.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    idle_timeout: Duration,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl UpstreamClient {
    /// Build a client with the configured request and connect timeouts.
    pub fn new(config: &ProxyConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.upstream.request_timeout())
            .connect_timeout(config.upstream.connect_timeout())
            .build()
            .map_err(|e| ProxyError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, config, api_key))
    }

    pub fn with_http_client(http: reqwest::Client, config: &ProxyConfig, api_key: String) -> Self {
        Self {
            http,
            url: config.chat_completions_url(),
            api_key,
            idle_timeout: config.upstream.stream_idle_timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue a non-streaming completion and wait for the whole body.
    pub async fn complete(
        &self,
        req: &ChatCompletionRequest,
        timer: &mut RequestTimer,
    ) -> Result<ChatCompletionResponse> {
        let response = self.send(req, timer).await?;

        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::from_transport(&e))?;

        tracing::debug!(body_len = body.len(), "Upstream response received");

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(error = %e, body = truncate(&body, 300), "Unparseable upstream response");
            ProxyError::malformed(format!("Failed to parse upstream response: {e}"))
        })?;

        if parsed.choices.is_empty() {
            return Err(ProxyError::malformed("Upstream response has no choices"));
        }

        Ok(parsed)
    }

    /// Open a streaming completion. Status errors surface here, before any
    /// chunk; failures after that arrive as the stream's last item.
    pub async fn stream(
        &self,
        req: &ChatCompletionRequest,
        timer: &mut RequestTimer,
    ) -> Result<UpstreamStream> {
        let response = self.send(req, timer).await?;
        Ok(Box::pin(decode_sse(response.bytes_stream(), self.idle_timeout)))
    }

    async fn send(
        &self,
        req: &ChatCompletionRequest,
        timer: &mut RequestTimer,
    ) -> Result<reqwest::Response> {
        tracing::info!(
            url = %self.url,
            model = %req.model,
            stream = req.stream,
            messages = req.messages.len(),
            "Dispatching upstream request"
        );

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(req)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Upstream request failed");
                ProxyError::from_transport(&e)
            })?;

        timer.mark_connected();

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ChatErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| truncate(&body, 300).to_string());

        tracing::warn!(status = status.as_u16(), %message, "Upstream rejected request");
        Err(ProxyError::rejected(status.as_u16(), message))
    }
}

/// Parse an SSE byte stream into upstream chunks.
fn decode_sse<S, B, E>(byte_stream: S, idle_timeout: Duration) -> impl Stream<Item = Result<ChatCompletionChunk>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProxyError> + Send + 'static,
{
    async_stream::stream! {
        let events = byte_stream.eventsource();
        tokio::pin!(events);

        loop {
            let event = match tokio::time::timeout(idle_timeout, events.next()).await {
                Err(_) => {
                    yield Err(ProxyError::timeout(format!(
                        "No upstream data for {}s",
                        idle_timeout.as_secs()
                    )));
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    yield Err(classify_stream_error(e));
                    break;
                }
                Ok(Some(Ok(event))) => event,
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }

            if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(data) {
                tracing::warn!(message = %err.error.message, "Upstream error inside stream");
                yield Err(ProxyError::rejected(502, err.error.message));
                break;
            }

            match serde_json::from_str::<ChatCompletionChunk>(data) {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unparseable chunk");
                    continue;
                }
            }
        }
    }
}

fn classify_stream_error<E: Into<ProxyError>>(err: EventStreamError<E>) -> ProxyError {
    match err {
        EventStreamError::Transport(e) => e.into(),
        EventStreamError::Utf8(e) => ProxyError::malformed(format!("Invalid UTF-8 in stream: {e}")),
        EventStreamError::Parser(e) => ProxyError::malformed(format!("Invalid SSE framing: {e}")),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
