//! Token counting.
//!
//! The default strategy is a character-based heuristic: ~4 characters per
//! token, accurate within ~10% for BPE tokenizers on English text and code.
//! An exact cl100k_base tokenizer is available behind the `tiktoken` cargo
//! feature for callers that need tight budgets.

use codeforge_core::message::Message;
use codeforge_core::provider::ToolDefinition;

/// A token counting strategy.
///
/// Implementations must be conservative enough that budgeting decisions
/// made against them do not overflow the real model context.
pub trait TokenCounter: Send + Sync {
    /// Count tokens for a raw string.
    fn count(&self, text: &str) -> usize;

    /// Count tokens for a message sequence, including per-message wire
    /// overhead (~4 tokens for role and delimiters) and tool-call payloads
    /// (+3 tokens of list framing when present).
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| {
                let mut tokens = 4 + self.count(&m.content);
                if !m.tool_calls.is_empty() {
                    tokens += 3;
                    for call in &m.tool_calls {
                        tokens += self.count(&call.name) + self.count(&call.arguments);
                    }
                }
                tokens
            })
            .sum()
    }

    /// Count tokens for tool definitions (serialized as JSON).
    fn count_tools(&self, tools: &[ToolDefinition]) -> usize {
        tools
            .iter()
            .map(|t| self.count(&serde_json::to_string(t).unwrap_or_default()))
            .sum()
    }
}

/// The default heuristic: 1 token ≈ 4 characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.len() + 3) / 4
    }
}

/// Exact tokenization via the cl100k_base BPE vocabulary.
#[cfg(feature = "tiktoken")]
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenCounter {
    pub fn new() -> Result<Self, crate::ContextError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| crate::ContextError::Persistence(e.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeforge_core::message::MessageToolCall;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(HeuristicCounter.count(""), 0);
    }

    #[test]
    fn short_string_is_at_least_one() {
        assert_eq!(HeuristicCounter.count("a"), 1);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(HeuristicCounter.count("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(HeuristicCounter.count("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        let text = "a".repeat(100);
        assert_eq!(HeuristicCounter.count(&text), 25);
    }

    #[test]
    fn message_includes_overhead() {
        // 4 chars of content = 1 token, plus 4 overhead
        let msgs = vec![Message::user("test")];
        assert_eq!(HeuristicCounter.count_messages(&msgs), 5);
    }

    #[test]
    fn tool_calls_counted() {
        let plain = vec![Message::assistant("")];
        let with_calls = vec![Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "shell".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            }],
        )];
        let base = HeuristicCounter.count_messages(&plain);
        let full = HeuristicCounter.count_messages(&with_calls);
        // list framing plus name plus arguments
        assert!(full > base + 3);
    }

    #[test]
    fn tools_counted_from_schema() {
        let tool = ToolDefinition {
            name: "search".into(),
            description: "Search the index".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } }
            }),
        };
        assert!(HeuristicCounter.count_tools(&[tool]) > 0);
        assert_eq!(HeuristicCounter.count_tools(&[]), 0);
    }
}
