//! Translate `OpenAI` Chat Completions requests into Anthropic Messages API requests.
//!
//! System and developer messages are lifted into the top-level `system` list,
//! `tool` messages become `tool_result` blocks in a user turn, and consecutive
//! messages that end up with the same role are merged, since the Messages API
//! expects user and assistant turns to alternate.

use std::collections::HashMap;

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Metadata, Role,
    SystemBlock, SystemContent, Tool, ToolChoice, ToolChoiceKind, ToolChoiceSpecific,
    ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatToolChoice, ContentPart,
};
use crate::error::{ProxyError, Result};

/// Used when the client sets neither `max_tokens` nor `max_completion_tokens`.
pub const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Translate an `OpenAI` Chat Completions request into an Anthropic Messages request
/// addressed to `target_model`.
///
/// # Errors
/// Returns `ProxyError::Translation` for message roles the Messages API cannot express.
pub fn openai_to_anthropic(
    req: &ChatCompletionRequest,
    target_model: &str,
) -> Result<MessagesRequest> {
    let mut system_blocks: Vec<SystemBlock> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                let text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
                if !text.is_empty() {
                    system_blocks.push(SystemBlock::text(text));
                }
            }
            "user" => push_blocks(&mut messages, Role::User, user_blocks(msg)),
            "assistant" => push_blocks(&mut messages, Role::Assistant, assistant_blocks(msg)),
            "tool" => push_blocks(&mut messages, Role::User, vec![tool_result_block(msg)]),
            other => {
                return Err(ProxyError::translation(format!(
                    "Unsupported message role '{other}'"
                )));
            }
        }
    }

    let system = if system_blocks.is_empty() {
        None
    } else {
        Some(SystemContent::Blocks(system_blocks))
    };

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: Some(t.function.parameters.clone().unwrap_or_else(
                    || serde_json::json!({ "type": "object", "properties": {} }),
                )),
                extra: HashMap::new(),
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let metadata = req.user.as_ref().map(|user| Metadata {
        user_id: Some(user.clone()),
        extra: HashMap::new(),
    });

    Ok(MessagesRequest {
        model: target_model.to_string(),
        max_tokens: req
            .max_completion_tokens
            .or(req.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        tools,
        tool_choice,
        metadata,
        stop_sequences: req.stop.clone().map(|s| s.into_vec()),
        thinking: None,
        extra: HashMap::new(),
    })
}

/// Append blocks under `role`, merging into the previous message when the role repeats.
fn push_blocks(messages: &mut Vec<Message>, role: Role, blocks: Vec<ContentBlock>) {
    if blocks.is_empty() {
        return;
    }

    if let Some(last) = messages.last_mut() {
        if last.role == role {
            if let MessageContent::Blocks(ref mut existing) = last.content {
                existing.extend(blocks);
                return;
            }
        }
    }

    messages.push(Message {
        role,
        content: MessageContent::Blocks(blocks),
    });
}

fn user_blocks(msg: &ChatMessage) -> Vec<ContentBlock> {
    match &msg.content {
        Some(ChatContent::Text(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(ChatContent::Parts(parts)) => parts.iter().map(translate_part).collect(),
        // An empty user turn still has to exist to keep roles alternating
        None => vec![ContentBlock::Text {
            text: String::new(),
        }],
    }
}

fn translate_part(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::ImageUrl { image_url } => ContentBlock::Image {
            source: image_source(&image_url.url),
        },
    }
}

/// `data:<media>;base64,<data>` URIs become inline sources, anything else a URL source.
fn image_source(url: &str) -> ImageSource {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((media_type, data)) = rest.split_once(";base64,") {
            return ImageSource::Base64 {
                media_type: media_type.to_string(),
                data: data.to_string(),
            };
        }
    }
    ImageSource::Url {
        url: url.to_string(),
    }
}

fn assistant_blocks(msg: &ChatMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(ref content) = msg.content {
        let text = content.as_text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    }

    if let Some(ref tool_calls) = msg.tool_calls {
        for tc in tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: parse_arguments(&tc.function.arguments),
            });
        }
    }

    blocks
}

/// Tool arguments arrive as a JSON string; the Messages API wants an object.
fn parse_arguments(arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| serde_json::json!({ "arguments": arguments }))
}

fn tool_result_block(msg: &ChatMessage) -> ContentBlock {
    let text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
    ContentBlock::ToolResult {
        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
        content: Some(ToolResultContent::Text(text)),
        is_error: None,
    }
}

fn translate_tool_choice(tc: &ChatToolChoice) -> ToolChoice {
    match tc {
        ChatToolChoice::String(kind) => {
            let choice_type = match kind.as_str() {
                "required" => "any",
                "none" => "none",
                _ => "auto",
            };
            ToolChoice::Kind(ToolChoiceKind {
                choice_type: choice_type.to_string(),
                disable_parallel_tool_use: None,
            })
        }
        ChatToolChoice::Specific(specific) => ToolChoice::Specific(ToolChoiceSpecific {
            choice_type: "tool".to_string(),
            name: specific.function.name.clone(),
            disable_parallel_tool_use: None,
        }),
    }
}
