use crate::config::RouterConfig;
use crate::logging::SharedLogger;
use crate::proxy;
use crate::router::{self, ModelMapper};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Upstream response headers worth relaying on passthrough.
const RELAYED_HEADERS: &[&str] = &[
    "request-id",
    "retry-after",
    "anthropic-ratelimit-requests-remaining",
];

#[derive(Clone)]
pub struct AppState {
    pub config: RouterConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
    pub mapper: Arc<ModelMapper>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/mappings", get(handle_mappings))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Failed to parse request: {}", e));
            let err = ChatErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let prepared = match router::prepare_chat_request(&state.mapper, &req) {
        Ok(p) => p,
        Err(e) => {
            state.logger.error("server", format!("Failed to translate request: {}", e));
            let err = ChatErrorResponse::invalid_request(e.to_string());
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    state.logger.routing(&req.model, &prepared.resolution);
    tracing::info!(
        inbound = %req.model,
        outbound = %prepared.resolution.model,
        reason = %prepared.resolution.reason,
        "Routed model"
    );

    if req.stream.unwrap_or(false) {
        let include_usage = req
            .stream_options
            .as_ref()
            .map_or(false, |o| o.include_usage);
        handle_chat_streaming(state, &prepared.request, &req.model, include_usage, &headers).await
    } else {
        handle_chat_non_streaming(state, &prepared.request, &req.model, &headers).await
    }
}

async fn handle_chat_non_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    requested_model: &str,
    headers: &HeaderMap,
) -> Response {
    match proxy::proxy_chat_non_streaming(
        req,
        requested_model,
        headers,
        &state.config,
        &state.client,
        &state.logger,
    )
    .await
    {
        Ok(proxy::ProxyResult::Success(resp)) => Json(resp).into_response(),
        Ok(proxy::ProxyResult::Error(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("Proxy error: {}", e));
            let err = ChatErrorResponse::api_error(format!("Proxy error: {}", e));
            (StatusCode::BAD_GATEWAY, Json(err)).into_response()
        }
    }
}

async fn handle_chat_streaming(
    state: Arc<AppState>,
    req: &MessagesRequest,
    requested_model: &str,
    include_usage: bool,
    headers: &HeaderMap,
) -> Response {
    let sse_stream = match proxy::proxy_chat_streaming(
        req,
        requested_model,
        include_usage,
        headers,
        &state.config,
        &state.client,
        &state.logger,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            state.logger.error("server", format!("Streaming setup error: {}", e));
            let err = ChatErrorResponse::api_error(format!("Streaming error: {}", e));
            return (StatusCode::BAD_GATEWAY, Json(err)).into_response();
        }
    };

    let event_stream = sse_stream.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(sse_event) => Ok(Event::default().data(sse_event.data)),
            Err(_) => Ok(Event::default().data("[DONE]")),
        }
    });

    Sse::new(event_stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response()
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state.logger.error("server", format!("Failed to parse request: {}", e));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let req = router::prepare_messages_request(&req);

    let upstream = match proxy::forward_messages(
        &req,
        &headers,
        &state.config,
        &state.client,
        &state.logger,
    )
    .await
    {
        Ok(u) => u,
        Err(e) => {
            state.logger.error("server", format!("Passthrough error: {}", e));
            let err = ErrorResponse::api_error(format!("Passthrough error: {}", e));
            return (StatusCode::BAD_GATEWAY, Json(err)).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/json"));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type);
    for name in RELAYED_HEADERS {
        if let Some(value) = upstream.headers.get(*name) {
            builder = builder.header(*name, value);
        }
    }

    // Streams straight through, SSE or not
    builder
        .body(Body::from_stream(upstream.response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Every identifier a client can usefully send: tier targets plus custom-mapping keys.
async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let tiers = state.mapper.tiers();
    let mut names: BTreeSet<String> = [&tiers.high, &tiers.default, &tiers.low]
        .into_iter()
        .cloned()
        .collect();
    names.extend(state.mapper.custom_mappings().into_keys());

    let models: Vec<serde_json::Value> = names
        .into_iter()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "anthropic",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

async fn handle_mappings(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let custom: std::collections::BTreeMap<String, String> =
        state.mapper.custom_mappings().into_iter().collect();

    Json(serde_json::json!({
        "custom": custom,
        "source": state.mapper.source_description(),
        "reload": state.config.mappings.reload.as_str(),
        "override": state.mapper.default_override(),
        "tiers": state.mapper.tiers(),
    }))
}
