use crate::catalog;
use crate::config::ProxyConfig;
use crate::error::{ErrorKind, ProxyError};
use crate::proxy::{self, log_outcome, Exchange, Outcome, RequestInfo};
use crate::translate::ollama_types::{EndpointKind, InboundRequest, ShowRequest};
use crate::translate::request::{is_load_request, map_inbound};
use crate::translate::response::{load_response, to_error_response};
use crate::translate::timing::{RequestTimer, TokenCounts};
use crate::upstream::UpstreamClient;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Read-only per-process state shared by every request task.
#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub upstream: UpstreamClient,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/api/version", get(handle_version))
        .route("/api/tags", get(handle_tags))
        .route("/api/show", post(handle_show))
        .route("/api/ps", get(handle_ps))
        .route("/api/chat", post(handle_chat))
        .route("/api/generate", post(handle_generate))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_root() -> &'static str {
    "Ollama is running"
}

async fn handle_version(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(catalog::version(&state.config))
}

async fn handle_tags(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(catalog::tags(&state.config))
}

async fn handle_ps(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(catalog::running(&state.config))
}

async fn handle_show(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    // the requested name is informational only
    let requested = serde_json::from_slice::<ShowRequest>(&body).unwrap_or_default();
    tracing::debug!(requested = %requested.model, "Show model");
    Json(catalog::show(&state.config))
}

async fn handle_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_completion(state, body, EndpointKind::Chat).await
}

async fn handle_generate(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    handle_completion(state, body, EndpointKind::Generate).await
}

async fn handle_completion(state: Arc<AppState>, body: Bytes, kind: EndpointKind) -> Response {
    let mut timer = RequestTimer::start();
    let model = state.config.upstream.model.clone();

    let req: InboundRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(endpoint = ?kind, error = %e, "Failed to parse request");
            let info = RequestInfo::new(kind, false);
            return error_reply(info, &timer, &model, ProxyError::invalid_request(e.to_string()));
        }
    };

    let info = RequestInfo::new(kind, req.is_streaming());
    tracing::info!(
        request_id = %info.request_id,
        endpoint = ?kind,
        streamed = info.streamed,
        client_model = %req.model,
        "Inbound request"
    );

    if is_load_request(&req, kind) {
        let reply = load_response(kind, &model, &timer);
        log_outcome(
            &info,
            &Outcome::Completed {
                done_reason: "load".to_string(),
            },
            TokenCounts::default(),
            reply.metrics.map(|m| m.total_duration).unwrap_or_default(),
        );
        return Json(reply).into_response();
    }

    let upstream_req = match map_inbound(&req, kind, &state.config) {
        Ok(r) => r,
        Err(e) => return error_reply(info, &timer, &model, e),
    };
    let exchange = Exchange::new(info, model.clone(), &upstream_req);

    if info.streamed {
        match proxy::proxy_streaming(&state.upstream, &upstream_req, exchange, timer).await {
            Ok(lines) => ndjson_response(Body::from_stream(lines)),
            Err(e) => error_reply(info, &timer, &model, e),
        }
    } else {
        match proxy::proxy_whole(&state.upstream, &upstream_req, &exchange, &mut timer).await {
            Ok(reply) => Json(reply).into_response(),
            Err(e) => error_reply(info, &timer, &model, e),
        }
    }
}

/// Translate a per-request failure into a downstream error object.
/// The error's detail is logged; the client only sees the fixed message.
fn error_reply(info: RequestInfo, timer: &RequestTimer, model: &str, err: ProxyError) -> Response {
    let kind: ErrorKind = err.kind();
    tracing::debug!(request_id = %info.request_id, error = %err, "Failure detail");

    let reply = to_error_response(kind, info.endpoint, model, timer);
    let total = reply.metrics.map(|m| m.total_duration).unwrap_or_default();
    log_outcome(&info, &Outcome::Failed { error: kind }, TokenCounts::default(), total);

    let status = StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(reply)).into_response()
}

fn ndjson_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
