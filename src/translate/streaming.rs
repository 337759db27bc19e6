//! State machine for translating Anthropic streaming events into OpenAI chunks.
//!
//! The [`StreamTranslator`] consumes Anthropic [`StreamEvent`]s one at a time,
//! tracking which content blocks are tool calls, and emits the corresponding
//! OpenAI `chat.completion.chunk` objects.

use std::collections::HashMap;

use super::anthropic_types::{Delta, ResponseContentBlock, StreamEvent};
use super::openai_types::{
    ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, ChunkToolCall, ChunkToolCallFunction,
};
use super::response::{chat_completion_id, map_stop_reason, map_usage, unix_now};

/// State machine that translates Anthropic stream events into OpenAI chunks.
///
/// Usage:
///   let mut translator = StreamTranslator::new("gpt-4", true);
///   for event in anthropic_events {
///       let chunks = translator.process_event(&event);
///       // send each chunk as `data: {json}`
///   }
///   let final_chunks = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    id: String,
    created: u64,
    include_usage: bool,
    started: bool,
    finished: bool,
    // Anthropic content block index -> OpenAI tool call index
    tool_indices: HashMap<usize, u64>,
    stop_reason: Option<String>,
    usage: ChatUsage,
}

impl StreamTranslator {
    /// `model` is echoed in every chunk. With `include_usage`, a trailing
    /// usage-only chunk is emitted, as OpenAI does for `stream_options.include_usage`.
    pub fn new(model: &str, include_usage: bool) -> Self {
        Self {
            model: model.to_string(),
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: unix_now(),
            include_usage,
            started: false,
            finished: false,
            tool_indices: HashMap::new(),
            stop_reason: None,
            usage: ChatUsage::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process a single Anthropic stream event, returning zero or more OpenAI chunks.
    pub fn process_event(&mut self, event: &StreamEvent) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        let mut chunks = Vec::new();

        match event {
            StreamEvent::MessageStart { message } => {
                self.id = chat_completion_id(&message.id);
                self.usage = map_usage(&message.usage);
                self.ensure_started(&mut chunks);
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.ensure_started(&mut chunks);
                match content_block {
                    ResponseContentBlock::ToolUse { id, name, .. } => {
                        let tool_index = self.tool_indices.len() as u64;
                        self.tool_indices.insert(*index, tool_index);
                        chunks.push(self.make_chunk(ChunkDelta {
                            tool_calls: Some(vec![ChunkToolCall {
                                index: tool_index,
                                id: Some(id.clone()),
                                call_type: Some("function".to_string()),
                                function: Some(ChunkToolCallFunction {
                                    name: Some(name.clone()),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                            ..ChunkDelta::default()
                        }));
                    }
                    ResponseContentBlock::Text { text } if !text.is_empty() => {
                        chunks.push(self.make_chunk(ChunkDelta {
                            content: Some(text.clone()),
                            ..ChunkDelta::default()
                        }));
                    }
                    _ => {}
                }
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                self.ensure_started(&mut chunks);
                let delta = match delta {
                    Delta::TextDelta { text } => Some(ChunkDelta {
                        content: Some(text.clone()),
                        ..ChunkDelta::default()
                    }),
                    Delta::ThinkingDelta { thinking } => Some(ChunkDelta {
                        reasoning_content: Some(thinking.clone()),
                        ..ChunkDelta::default()
                    }),
                    Delta::InputJsonDelta { partial_json } => {
                        self.tool_indices.get(index).map(|tool_index| ChunkDelta {
                            tool_calls: Some(vec![ChunkToolCall {
                                index: *tool_index,
                                id: None,
                                call_type: None,
                                function: Some(ChunkToolCallFunction {
                                    name: None,
                                    arguments: Some(partial_json.clone()),
                                }),
                            }]),
                            ..ChunkDelta::default()
                        })
                    }
                    Delta::Other => None,
                };
                if let Some(delta) = delta {
                    chunks.push(self.make_chunk(delta));
                }
            }
            StreamEvent::MessageDelta { delta, usage } => {
                if let Some(ref reason) = delta.stop_reason {
                    self.stop_reason = Some(reason.clone());
                }
                self.usage.completion_tokens = usage.output_tokens;
                self.usage.total_tokens = self.usage.prompt_tokens + usage.output_tokens;
            }
            StreamEvent::MessageStop => {
                chunks.append(&mut self.finish());
            }
            StreamEvent::ContentBlockStop { .. }
            | StreamEvent::Ping
            | StreamEvent::Error { .. } => {}
        }

        chunks
    }

    /// Call when the upstream stream ends to flush the closing chunks.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        self.ensure_started(&mut chunks);
        self.finished = true;

        let reason = map_stop_reason(self.stop_reason.as_deref().unwrap_or("end_turn"));
        let mut last = self.make_chunk(ChunkDelta::default());
        last.choices[0].finish_reason = Some(reason.to_string());
        chunks.push(last);

        if self.include_usage {
            chunks.push(ChatCompletionChunk {
                id: self.id.clone(),
                object: "chat.completion.chunk".to_string(),
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(self.usage.clone()),
            });
        }

        chunks
    }

    /// The first chunk of a stream carries the assistant role.
    fn ensure_started(&mut self, chunks: &mut Vec<ChatCompletionChunk>) {
        if self.started {
            return;
        }
        self.started = true;
        chunks.push(self.make_chunk(ChunkDelta {
            role: Some("assistant".to_string()),
            content: Some(String::new()),
            ..ChunkDelta::default()
        }));
    }

    fn make_chunk(&self, delta: ChunkDelta) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(value: serde_json::Value) -> StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    fn message_start() -> StreamEvent {
        event(serde_json::json!({
            "type": "message_start",
            "message": {
                "id": "msg_01abc",
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": "claude-sonnet-4-5",
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 12, "output_tokens": 1}
            }
        }))
    }

    #[test]
    fn test_simple_text_stream() {
        let mut translator = StreamTranslator::new("gpt-4", false);

        let chunks = translator.process_event(&message_start());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "chatcmpl-01abc");
        assert_eq!(chunks[0].model, "gpt-4");
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));

        let chunks = translator.process_event(&event(serde_json::json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""}
        })));
        assert!(chunks.is_empty());

        let chunks = translator.process_event(&event(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": "Hello"}
        })));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));

        let _ = translator.process_event(&event(serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "max_tokens", "stop_sequence": null},
            "usage": {"output_tokens": 7}
        })));

        let chunks = translator.process_event(&event(serde_json::json!({"type": "message_stop"})));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("length"));
        assert!(translator.is_finished());
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_tool_call_stream() {
        let mut translator = StreamTranslator::new("gpt-4", false);
        let _ = translator.process_event(&message_start());

        let chunks = translator.process_event(&event(serde_json::json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {}}
        })));
        let call = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.index, 0);
        assert_eq!(call.id.as_deref(), Some("toolu_1"));
        assert_eq!(
            call.function.as_ref().unwrap().name.as_deref(),
            Some("search")
        );

        let chunks = translator.process_event(&event(serde_json::json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "{\"q\""}
        })));
        let call = &chunks[0].choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.index, 0);
        assert_eq!(
            call.function.as_ref().unwrap().arguments.as_deref(),
            Some("{\"q\"")
        );

        let _ = translator.process_event(&event(serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use"},
            "usage": {"output_tokens": 3}
        })));
        let chunks = translator.finish();
        assert_eq!(
            chunks[0].choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }

    #[test]
    fn test_usage_chunk_when_requested() {
        let mut translator = StreamTranslator::new("gpt-4", true);
        let _ = translator.process_event(&message_start());
        let _ = translator.process_event(&event(serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 5}
        })));
        let chunks = translator.finish();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].choices.is_empty());
        let usage = chunks[1].usage.as_ref().unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 17);
    }

    #[test]
    fn test_unknown_deltas_are_skipped() {
        let mut translator = StreamTranslator::new("gpt-4", false);
        let _ = translator.process_event(&message_start());
        let chunks = translator.process_event(&event(serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "signature_delta", "signature": "abc"}
        })));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_finish_without_events() {
        let mut translator = StreamTranslator::new("gpt-4", false);
        let chunks = translator.finish();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
        assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("stop"));
    }
}
