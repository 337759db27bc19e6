//! Guarantee the required persona prompt leads every forwarded request.

use crate::translate::anthropic_types::{MessagesRequest, SystemBlock, SystemContent};
use std::borrow::Cow;

/// Text that must be the first system message of every upstream request.
pub const REQUIRED_SYSTEM_PROMPT: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

pub fn required_system_block() -> SystemBlock {
    SystemBlock::text(REQUIRED_SYSTEM_PROMPT)
}

/// Whether the first system entry is exactly the required prompt.
///
/// Only position 0 is inspected. `cache_control` does not affect the match.
pub fn has_required_system_prompt(system: Option<&SystemContent>) -> bool {
    match system {
        Some(SystemContent::Text(text)) => text == REQUIRED_SYSTEM_PROMPT,
        Some(SystemContent::Blocks(blocks)) => matches!(
            blocks.first(),
            Some(SystemBlock::Text { text, .. }) if text == REQUIRED_SYSTEM_PROMPT
        ),
        None => false,
    }
}

/// Ensure the required prompt is the first system message.
///
/// Returns the input borrowed when it already satisfies the invariant, or an
/// owned copy with the prompt prepended ahead of any existing entries.
pub fn ensure_required_system_prompt(request: &MessagesRequest) -> Cow<'_, MessagesRequest> {
    if has_required_system_prompt(request.system.as_ref()) {
        return Cow::Borrowed(request);
    }

    let existing = request
        .system
        .as_ref()
        .map(SystemContent::to_blocks)
        .unwrap_or_default();

    let mut blocks = Vec::with_capacity(existing.len() + 1);
    blocks.push(required_system_block());
    blocks.extend(existing);

    let mut updated = request.clone();
    updated.system = Some(SystemContent::Blocks(blocks));
    Cow::Owned(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{Message, MessageContent, Role};
    use std::collections::HashMap;

    fn request(system: Option<SystemContent>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 100,
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("Say hello in one sentence.".to_string()),
            }],
            system,
            stream: None,
            temperature: None,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            metadata: None,
            stop_sequences: None,
            thinking: None,
            extra: HashMap::default(),
        }
    }

    fn blocks(texts: &[&str]) -> SystemContent {
        SystemContent::Blocks(texts.iter().map(|t| SystemBlock::text(*t)).collect())
    }

    fn texts(req: &MessagesRequest) -> Vec<String> {
        req.system
            .as_ref()
            .map(SystemContent::to_blocks)
            .unwrap_or_default()
            .into_iter()
            .map(|SystemBlock::Text { text, .. }| text)
            .collect()
    }

    #[test]
    fn test_absent_system_gets_required_prompt() {
        let req = request(None);
        let out = ensure_required_system_prompt(&req);
        assert!(matches!(out, Cow::Owned(_)));
        assert_eq!(out.system, Some(blocks(&[REQUIRED_SYSTEM_PROMPT])));
        assert_eq!(req.system, None, "input must not be mutated");
    }

    #[test]
    fn test_empty_system_gets_required_prompt() {
        for system in [SystemContent::Blocks(Vec::new()), SystemContent::Text(String::new())] {
            let req = request(Some(system));
            let out = ensure_required_system_prompt(&req);
            assert_eq!(out.system, Some(blocks(&[REQUIRED_SYSTEM_PROMPT])));
        }
    }

    #[test]
    fn test_existing_prompt_is_returned_as_is() {
        let req = request(Some(blocks(&[
            REQUIRED_SYSTEM_PROMPT,
            "You are also a helpful assistant.",
        ])));
        let out = ensure_required_system_prompt(&req);
        match out {
            Cow::Borrowed(r) => assert!(std::ptr::eq(r, &req)),
            Cow::Owned(_) => panic!("expected the same request back"),
        }
    }

    #[test]
    fn test_existing_prompt_with_cache_control_is_recognized() {
        let req = request(Some(SystemContent::Blocks(vec![SystemBlock::Text {
            text: REQUIRED_SYSTEM_PROMPT.to_string(),
            cache_control: Some(serde_json::json!({"type": "ephemeral"})),
        }])));
        assert!(matches!(ensure_required_system_prompt(&req), Cow::Borrowed(_)));
    }

    #[test]
    fn test_plain_string_prompt_is_recognized() {
        let req = request(Some(SystemContent::Text(REQUIRED_SYSTEM_PROMPT.to_string())));
        assert!(matches!(ensure_required_system_prompt(&req), Cow::Borrowed(_)));
    }

    #[test]
    fn test_prepends_and_preserves_order() {
        let req = request(Some(blocks(&["You are also a helpful assistant."])));
        let out = ensure_required_system_prompt(&req);
        assert_eq!(
            texts(&out),
            vec![REQUIRED_SYSTEM_PROMPT, "You are also a helpful assistant."]
        );
    }

    #[test]
    fn test_plain_string_system_becomes_second_block() {
        let req = request(Some(SystemContent::Text("Be terse.".to_string())));
        let out = ensure_required_system_prompt(&req);
        assert_eq!(texts(&out), vec![REQUIRED_SYSTEM_PROMPT, "Be terse."]);
    }

    #[test]
    fn test_non_first_occurrence_is_not_deduplicated() {
        let req = request(Some(blocks(&["First.", REQUIRED_SYSTEM_PROMPT])));
        let out = ensure_required_system_prompt(&req);
        assert_eq!(
            texts(&out),
            vec![REQUIRED_SYSTEM_PROMPT, "First.", REQUIRED_SYSTEM_PROMPT]
        );
    }

    #[test]
    fn test_match_is_exact() {
        let variants = [
            format!(" {REQUIRED_SYSTEM_PROMPT}"),
            REQUIRED_SYSTEM_PROMPT.to_lowercase(),
            REQUIRED_SYSTEM_PROMPT.trim_end_matches('.').to_string(),
        ];
        for v in variants {
            let req = request(Some(blocks(&[v.as_str()])));
            let out = ensure_required_system_prompt(&req);
            assert_eq!(texts(&out), vec![REQUIRED_SYSTEM_PROMPT.to_string(), v]);
        }
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            None,
            Some(SystemContent::Text("Be terse.".to_string())),
            Some(blocks(&["A", "B"])),
            Some(blocks(&[REQUIRED_SYSTEM_PROMPT])),
        ];
        for system in cases {
            let req = request(system);
            let once = ensure_required_system_prompt(&req).into_owned();
            let twice = ensure_required_system_prompt(&once);
            assert!(matches!(twice, Cow::Borrowed(_)));
            assert_eq!(*twice, once);
        }
    }

    #[test]
    fn test_other_fields_untouched() {
        let mut req = request(None);
        req.extra
            .insert("service_tier".to_string(), serde_json::json!("auto"));
        let out = ensure_required_system_prompt(&req);
        assert_eq!(out.model, req.model);
        assert_eq!(out.messages, req.messages);
        assert_eq!(out.extra, req.extra);
    }
}
