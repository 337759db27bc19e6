use crate::config::RouterConfig;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::translate::anthropic_types::{
    ErrorResponse, MessagesRequest, MessagesResponse, StreamEvent,
};
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::response::{anthropic_error_to_openai, anthropic_to_openai};
use crate::translate::streaming::StreamTranslator;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{self, Stream};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use std::pin::Pin;

/// Inbound headers relayed to the upstream as-is.
const FORWARDED_HEADERS: &[&str] = &["authorization", "anthropic-beta"];

/// Outcome of a non-streaming chat completion
pub enum ProxyResult {
    Success(ChatCompletionResponse),
    Error(ChatErrorResponse, u16),
}

/// A stream of SSE `data:` payloads for the client
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send>>;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub data: String,
}

impl SseEvent {
    fn json<T: serde::Serialize>(value: &T) -> Option<Self> {
        serde_json::to_string(value).ok().map(|data| Self { data })
    }

    fn done() -> Self {
        Self {
            data: "[DONE]".to_string(),
        }
    }
}

/// Raw upstream reply, relayed without translation.
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub response: reqwest::Response,
}

/// POST a Messages API request upstream with the right credentials and version.
async fn send_messages(
    req: &MessagesRequest,
    inbound_headers: &HeaderMap,
    config: &RouterConfig,
    client: &reqwest::Client,
) -> Result<reqwest::Response> {
    let url = format!("{}/v1/messages", config.upstream.base_url.trim_end_matches('/'));

    let mut builder = client.post(&url).header("content-type", "application/json");

    match config.resolve_api_key() {
        Some(key) => builder = builder.header("x-api-key", key),
        None => {
            if let Some(key) = inbound_headers.get("x-api-key") {
                builder = builder.header("x-api-key", key);
            }
        }
    }

    for name in FORWARDED_HEADERS {
        if let Some(value) = inbound_headers.get(*name) {
            builder = builder.header(*name, value);
        }
    }

    let version = inbound_headers
        .get("anthropic-version")
        .cloned()
        .or_else(|| HeaderValue::from_str(&config.upstream.anthropic_version).ok());
    if let Some(version) = version {
        builder = builder.header("anthropic-version", version);
    }

    builder
        .json(req)
        .send()
        .await
        .map_err(|e| ProxyError::upstream(format!("Request to {} failed: {}", url, e)))
}

/// Forward a native Messages API request and hand back the upstream reply untouched.
pub async fn forward_messages(
    req: &MessagesRequest,
    inbound_headers: &HeaderMap,
    config: &RouterConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<UpstreamResponse> {
    logger.info(
        "proxy",
        format!("POST /v1/messages model={} streaming={}", req.model, req.stream.unwrap_or(false)),
    );

    let response = send_messages(req, inbound_headers, config, client).await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();

    logger.debug("proxy", format!("Upstream status={}", status));

    Ok(UpstreamResponse {
        status,
        headers,
        response,
    })
}

/// Forward a translated chat completion and translate the reply back.
///
/// `requested_model` is the name the client asked for; it is echoed in the response.
pub async fn proxy_chat_non_streaming(
    req: &MessagesRequest,
    requested_model: &str,
    inbound_headers: &HeaderMap,
    config: &RouterConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<ProxyResult> {
    logger.info("proxy", format!("POST /v1/messages model={}", req.model));

    let response = send_messages(req, inbound_headers, config, client).await?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::upstream(format!("Failed to read response body: {}", e)))?;

    logger.debug(
        "proxy",
        format!("Response status={} body_len={}", status, body.len()),
    );

    if status >= 400 {
        return Ok(ProxyResult::Error(upstream_error(status, &body, logger), status));
    }

    let anthropic_resp: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse upstream response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let chat_resp = anthropic_to_openai(&anthropic_resp, requested_model);

    logger.info(
        "proxy",
        format!(
            "Completed: in={} out={} tokens",
            anthropic_resp.usage.input_tokens, anthropic_resp.usage.output_tokens
        ),
    );

    Ok(ProxyResult::Success(chat_resp))
}

/// Forward a translated streaming chat completion, returning OpenAI SSE payloads.
pub async fn proxy_chat_streaming(
    req: &MessagesRequest,
    requested_model: &str,
    include_usage: bool,
    inbound_headers: &HeaderMap,
    config: &RouterConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<SseStream> {
    logger.info("proxy", format!("POST /v1/messages model={} (streaming)", req.model));

    let response = send_messages(req, inbound_headers, config, client).await?;
    let status = response.status().as_u16();

    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        let error = upstream_error(status, &body, logger);
        let events: Vec<std::result::Result<SseEvent, std::io::Error>> = SseEvent::json(&error)
            .into_iter()
            .chain(std::iter::once(SseEvent::done()))
            .map(Ok)
            .collect();
        return Ok(Box::pin(stream::iter(events)));
    }

    let translator = StreamTranslator::new(requested_model, include_usage);
    let event_stream = sse_translate_stream(response.bytes_stream(), translator, logger.clone());

    Ok(Box::pin(event_stream))
}

/// Parse an Anthropic SSE byte stream and translate events into OpenAI chunks.
fn sse_translate_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    mut translator: StreamTranslator,
    logger: SharedLogger,
) -> impl Stream<Item = std::result::Result<SseEvent, std::io::Error>> + Send + 'static
where
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let events = byte_stream.eventsource();
        tokio::pin!(events);
        let mut failed = false;

        while let Some(next) = events.next().await {
            let event = match next {
                Ok(e) => e,
                Err(e) => {
                    logger.error("stream", format!("Upstream stream error: {}", e));
                    let error =
                        ChatErrorResponse::api_error(format!("Upstream stream interrupted: {}", e));
                    if let Some(sse) = SseEvent::json(&error) {
                        yield Ok(sse);
                    }
                    failed = true;
                    break;
                }
            };

            let parsed: StreamEvent = match serde_json::from_str(&event.data) {
                Ok(p) => p,
                Err(e) => {
                    logger.debug(
                        "stream",
                        format!("Skipping unparseable event {}: {}", event.event, e),
                    );
                    continue;
                }
            };

            if let StreamEvent::Error { ref error } = parsed {
                logger.warn("stream", format!("Upstream error event: {}", error.message));
                let body = ErrorResponse {
                    error_type: "error".to_string(),
                    error: error.clone(),
                };
                if let Some(sse) = SseEvent::json(&anthropic_error_to_openai(&body)) {
                    yield Ok(sse);
                }
                failed = true;
                break;
            }

            for chunk in translator.process_event(&parsed) {
                if let Some(sse) = SseEvent::json(&chunk) {
                    yield Ok(sse);
                }
            }

            if translator.is_finished() {
                break;
            }
        }

        // Close the completion even if message_stop never arrived. A failed
        // stream ends on its error payload with no finish_reason.
        if !failed {
            for chunk in translator.finish() {
                if let Some(sse) = SseEvent::json(&chunk) {
                    yield Ok(sse);
                }
            }
        }

        yield Ok(SseEvent::done());
        logger.info("stream", if failed { "Stream aborted" } else { "Stream completed" });
    }
}

/// Turn an upstream error body into an OpenAI-shaped error.
fn upstream_error(status: u16, body: &str, logger: &SharedLogger) -> ChatErrorResponse {
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(body) {
        logger.warn("proxy", format!("Upstream error: {}", err.error.message));
        return anthropic_error_to_openai(&err);
    }

    logger.warn(
        "proxy",
        format!("Upstream error status={}: {}", status, truncate(body, 300)),
    );
    ChatErrorResponse::api_error(format!(
        "Upstream returned status {}: {}",
        status,
        truncate(body, 500)
    ))
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
