use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{
    ChatCompletionResponse, ChatErrorResponse, ChatToolCall, ChatToolCallFunction, ChatUsage,
    Choice, ChoiceMessage,
};

/// Translate an Anthropic Messages response into an OpenAI Chat Completion response.
/// Pure function: `requested_model` is the name the client originally asked for.
pub fn anthropic_to_openai(
    resp: &MessagesResponse,
    requested_model: &str,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in &resp.content {
        match block {
            ResponseContentBlock::Text { text: t } => text.push_str(t),
            ResponseContentBlock::Thinking { thinking, .. } => reasoning.push_str(thinking),
            ResponseContentBlock::ToolUse { id, name, input } => tool_calls.push(ChatToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_default(),
                },
            }),
            ResponseContentBlock::Unsupported => {}
        }
    }

    // OpenAI clients expect null content on pure tool-call turns
    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    let finish_reason = map_stop_reason(resp.stop_reason.as_deref().unwrap_or("end_turn"));

    ChatCompletionResponse {
        id: chat_completion_id(&resp.id),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content,
                reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: Some(map_usage(&resp.usage)),
    }
}

/// Map Anthropic stop_reason to OpenAI finish_reason
pub fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        // end_turn, stop_sequence, pause_turn and anything newer
        _ => "stop",
    }
}

/// Prompt tokens include cached input, matching how OpenAI reports them.
pub fn map_usage(usage: &Usage) -> ChatUsage {
    let prompt_tokens = usage.input_tokens
        + usage.cache_creation_input_tokens.unwrap_or(0)
        + usage.cache_read_input_tokens.unwrap_or(0);
    ChatUsage {
        prompt_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: prompt_tokens + usage.output_tokens,
    }
}

/// Reuse the Anthropic message ID, prefixed to look like an OpenAI ID
pub fn chat_completion_id(message_id: &str) -> String {
    format!("chatcmpl-{}", message_id.trim_start_matches("msg_"))
}

pub(crate) fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Translate an Anthropic error into an OpenAI error response
pub fn anthropic_error_to_openai(err: &ErrorResponse) -> ChatErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" | "not_found_error" | "request_too_large" => {
            "invalid_request_error"
        }
        "authentication_error" => "authentication_error",
        "permission_error" => "permission_error",
        "rate_limit_error" => "rate_limit_error",
        _ => "server_error",
    };

    ChatErrorResponse::new(error_type, &err.error.message)
}
