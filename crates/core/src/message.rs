//! Message and Conversation domain types.
//!
//! The conversation is an append-only log: messages are never mutated in
//! place, corrections are new appended messages. This keeps the transcript
//! replayable and prefix-stable across loop iterations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
///
/// Invariant: an assistant message carries non-empty content or at least
/// one tool call, never neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content (may be empty on assistant turns that only
    /// carry tool calls)
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Create an assistant message that carries tool calls.
    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<MessageToolCall>,
    ) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    /// Create a tool result message, keyed by the originating call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A tool call embedded in an assistant message, as it appears on the wire.
///
/// `arguments` stays a raw JSON string here; it is decoded (leniently) only
/// at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call (echoed by the matching tool result)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// An append-only ordered log of conversation turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message. Messages are never removed or edited afterwards
    /// except through [`Conversation::clear_history`].
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Clone the live message sequence for a single request.
    ///
    /// Per-turn context strings are prefixed onto the snapshot copy of the
    /// current user turn by the caller; history keeps the bare text.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Trim history under context pressure.
    ///
    /// Keeps the leading system message when `keep_system` is set, plus the
    /// last `keep_last` messages.
    pub fn clear_history(&mut self, keep_system: bool, keep_last: usize) {
        let system = if keep_system
            && self
                .messages
                .first()
                .is_some_and(|m| m.role == Role::System)
        {
            Some(self.messages[0].clone())
        } else {
            None
        };

        let tail_start = self.messages.len().saturating_sub(keep_last);
        let mut kept: Vec<Message> = system.into_iter().collect();
        if keep_last > 0 {
            kept.extend(self.messages[tail_start..].iter().cloned());
        }
        self.messages = kept;
        self.updated_at = Utc::now();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Fix the failing test");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Fix the failing test");
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result("call_42", "exit code 0");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_42"));
    }

    #[test]
    fn snapshot_is_a_copy() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hello"));
        let snap = conv.snapshot();
        conv.push(Message::assistant("hi"));
        assert_eq!(snap.len(), 1);
        assert_eq!(conv.messages.len(), 2);
    }

    #[test]
    fn clear_history_keeps_system_and_tail() {
        let mut conv = Conversation::new();
        conv.push(Message::system("You are a coding agent"));
        for i in 0..10 {
            conv.push(Message::user(format!("msg {i}")));
        }
        conv.clear_history(true, 3);
        assert_eq!(conv.messages.len(), 4);
        assert_eq!(conv.messages[0].role, Role::System);
        assert_eq!(conv.messages[3].content, "msg 9");
    }

    #[test]
    fn clear_history_drops_everything_without_flags() {
        let mut conv = Conversation::new();
        conv.push(Message::system("sys"));
        conv.push(Message::user("u"));
        conv.clear_history(false, 0);
        assert!(conv.messages.is_empty());
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: "call_1".into(),
                name: "shell".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            }],
        );
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "shell");
    }
}
