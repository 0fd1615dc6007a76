//! Message, session, and turn domain types.
//!
//! These are the core value objects that flow through the entire system:
//! an adapter decodes a platform event into a `Message`, the context store
//! persists it, and the request builder projects it toward a provider.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which kind of conversation a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionScope {
    /// A shared group conversation — all members see the same context.
    Group,
    /// A one-on-one conversation, isolated per peer.
    Private,
}

/// Identifies a durable conversation: a scope plus a platform-opaque id.
///
/// The canonical string form (`group:<id>` / `private:<id>`) is used as
/// the storage key and the lock key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub scope: SessionScope,
    pub id: String,
}

impl SessionKey {
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            scope: SessionScope::Group,
            id: id.into(),
        }
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self {
            scope: SessionScope::Private,
            id: id.into(),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            SessionScope::Group => write!(f, "group:{}", self.id),
            SessionScope::Private => write!(f, "private:{}", self.id),
        }
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
    /// System instructions or synthesized summaries
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

/// One typed piece of message content.
///
/// Messages are multi-part: a user turn may carry text plus image
/// references, an assistant turn may carry tool invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },

    Image { reference: String, mime: String },

    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolResult {
        call_id: String,
        name: String,
        payload: String,
        truncated: bool,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(reference: impl Into<String>, mime: impl Into<String>) -> Self {
        Self::Image {
            reference: reference.into(),
            mime: mime.into(),
        }
    }

    /// Build a tool result, hard-cutting the payload at `max_chars`
    /// characters. Overflow sets `truncated = true` — the payload is
    /// never silently dropped.
    pub fn tool_result_capped(
        call_id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
        max_chars: usize,
    ) -> Self {
        let payload = payload.into();
        let (payload, truncated) = cap_chars(payload, max_chars);
        Self::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            truncated,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_part(&self) -> bool {
        matches!(self, Self::ToolCall { .. } | Self::ToolResult { .. })
    }
}

/// Cut a string to at most `max_chars` characters on a char boundary.
fn cap_chars(s: String, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s, false);
    }
    (s.chars().take(max_chars).collect(), true)
}

/// A single message in a session's archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID — appends are idempotent on this.
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// Typed content parts
    pub parts: Vec<ContentPart>,

    /// Which turn this message belongs to (monotonic per session)
    pub turn_index: u64,

    /// Timestamp
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, parts: Vec<ContentPart>, turn_index: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            turn_index,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message with plain text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::text(text)], 0)
    }

    /// Create a new assistant message with plain text content.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::text(text)], 0)
    }

    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentPart::text(text)], 0)
    }

    /// Create a tool result message, capping the payload length.
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
        max_chars: usize,
    ) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentPart::tool_result_capped(
                call_id, name, payload, max_chars,
            )],
            0,
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_turn_index(mut self, turn_index: u64) -> Self {
        self.turn_index = turn_index;
        self
    }

    /// All text parts joined with newlines.
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether this message contains any tool call or tool result parts.
    pub fn has_tool_parts(&self) -> bool {
        self.parts.iter().any(ContentPart::is_tool_part)
    }
}

/// A turn: one user message plus everything up to the next user message
/// (assistant replies, tool round-trips). Turn boundaries are the unit
/// of context trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub index: u64,
    pub messages: Vec<Message>,
}

impl Turn {
    pub fn joined_text(&self) -> String {
        self.messages
            .iter()
            .map(Message::joined_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Group an archive slice into turns, preserving arrival order.
///
/// A new turn starts at every `user` message. Messages arriving before
/// the first user message (e.g. seeded system notes) form a turn of
/// their own so nothing is lost.
pub fn group_turns(messages: &[Message]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = Vec::new();
    for msg in messages {
        let start_new = msg.role == Role::User || turns.is_empty();
        if start_new {
            turns.push(Turn {
                index: msg.turn_index,
                messages: vec![msg.clone()],
            });
        } else {
            turns.last_mut().expect("non-empty").messages.push(msg.clone());
        }
    }
    turns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_display() {
        assert_eq!(SessionKey::group("42").to_string(), "group:42");
        assert_eq!(SessionKey::private("7").to_string(), "private:7");
    }

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.joined_text(), "Hello!");
        assert!(!msg.has_tool_parts());
    }

    #[test]
    fn tool_result_truncation_sets_flag() {
        let part = ContentPart::tool_result_capped("c1", "web_search", "x".repeat(10_000), 2000);
        match part {
            ContentPart::ToolResult {
                payload, truncated, ..
            } => {
                assert_eq!(payload.chars().count(), 2000);
                assert!(truncated);
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn tool_result_under_cap_is_untouched() {
        let part = ContentPart::tool_result_capped("c1", "calc", "short", 2000);
        match part {
            ContentPart::ToolResult {
                payload, truncated, ..
            } => {
                assert_eq!(payload, "short");
                assert!(!truncated);
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let part = ContentPart::tool_result_capped("c1", "t", "日本語テキスト", 3);
        match part {
            ContentPart::ToolResult {
                payload, truncated, ..
            } => {
                assert_eq!(payload, "日本語");
                assert!(truncated);
            }
            _ => panic!("expected ToolResult"),
        }
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::new(
            Role::Assistant,
            vec![
                ContentPart::text("calling a tool"),
                ContentPart::ToolCall {
                    call_id: "call_1".into(),
                    name: "web_search".into(),
                    arguments: serde_json::json!({"query": "rust"}),
                },
            ],
            3,
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_index, 3);
        assert!(back.has_tool_parts());
    }

    #[test]
    fn group_turns_splits_on_user_messages() {
        let msgs = vec![
            Message::user("q1").with_turn_index(1),
            Message::assistant("a1").with_turn_index(1),
            Message::tool_result("c", "t", "out", 100).with_turn_index(1),
            Message::user("q2").with_turn_index(2),
            Message::assistant("a2").with_turn_index(2),
        ];
        let turns = group_turns(&msgs);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].messages.len(), 3);
        assert_eq!(turns[1].messages.len(), 2);
        assert_eq!(turns[1].index, 2);
    }

    #[test]
    fn group_turns_keeps_leading_non_user_messages() {
        let msgs = vec![
            Message::system("seeded note"),
            Message::user("q1").with_turn_index(1),
        ];
        let turns = group_turns(&msgs);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].messages[0].role, Role::System);
    }
}
