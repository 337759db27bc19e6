//! The request transformation pipeline.
//!
//! Two independent steps run on every forwarded request: the model mapper
//! rewrites `model`, and the system prompt normalizer rewrites `system`.
//! Both are synchronous and never fail.

pub mod model_mapper;
pub mod system_prompt;

use std::borrow::Cow;

pub use model_mapper::{
    classify, CustomMappings, JsonFileMappings, MappingReason, MappingSource, ModelMapper,
    Resolution, StaticMappings, Tier,
};
pub use system_prompt::{ensure_required_system_prompt, REQUIRED_SYSTEM_PROMPT};

use crate::error::Result;
use crate::translate::anthropic_types::MessagesRequest;
use crate::translate::openai_types::ChatCompletionRequest;
use crate::translate::request::openai_to_anthropic;

/// An OpenAI-style request, rewritten and ready for the Messages API.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: MessagesRequest,
    pub resolution: Resolution,
}

/// Map the model, translate to the Messages API, then ensure the required prompt.
///
/// # Errors
/// Only the format translation can fail; both pipeline steps are total.
pub fn prepare_chat_request(
    mapper: &ModelMapper,
    req: &ChatCompletionRequest,
) -> Result<PreparedRequest> {
    let resolution = mapper.resolve_with_reason(&req.model);
    let translated = openai_to_anthropic(req, &resolution.model)?;
    let request = ensure_required_system_prompt(&translated).into_owned();
    Ok(PreparedRequest {
        request,
        resolution,
    })
}

/// Native Messages API requests already carry Anthropic model names, so only
/// the system prompt step applies.
pub fn prepare_messages_request(req: &MessagesRequest) -> Cow<'_, MessagesRequest> {
    ensure_required_system_prompt(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn native_body(system: serde_json::Value) -> serde_json::Value {
        json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 256,
            "temperature": 0.5,
            "top_k": 5,
            "system": system,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}},
                    {"type": "document", "source": {"type": "text", "media_type": "text/plain", "data": "notes"}, "citations": {"enabled": true}}
                ]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "x"}, "cache_control": {"type": "ephemeral"}}
                ]},
                {"role": "user", "content": "thanks"}
            ],
            "tools": [{"name": "lookup", "input_schema": {"type": "object"}, "cache_control": {"type": "ephemeral"}}],
            "tool_choice": {"type": "auto", "disable_parallel_tool_use": true},
            "metadata": {"user_id": "u-1"},
            "stop_sequences": ["END"],
            "service_tier": "auto"
        })
    }

    fn round_trip(body: &serde_json::Value) -> serde_json::Value {
        let req: MessagesRequest = serde_json::from_value(body.clone()).unwrap();
        serde_json::to_value(prepare_messages_request(&req).as_ref()).unwrap()
    }

    fn without_system(mut value: serde_json::Value) -> serde_json::Value {
        value.as_object_mut().unwrap().remove("system");
        value
    }

    #[test]
    fn test_messages_request_forwarded_verbatim_apart_from_system() {
        let body = native_body(json!([{"type": "text", "text": "Be brief."}]));
        let forwarded = round_trip(&body);

        assert_eq!(without_system(forwarded.clone()), without_system(body));
        assert_eq!(forwarded["system"][0]["text"], REQUIRED_SYSTEM_PROMPT);
        assert_eq!(forwarded["system"][1]["text"], "Be brief.");
    }

    #[test]
    fn test_satisfied_messages_request_is_byte_for_byte() {
        let body = native_body(json!([
            {"type": "text", "text": REQUIRED_SYSTEM_PROMPT, "cache_control": {"type": "ephemeral"}}
        ]));
        assert_eq!(round_trip(&body), body);
    }
}
