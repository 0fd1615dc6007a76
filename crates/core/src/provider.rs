//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a fully-built `RequestPlan` to an LLM and
//! get a response back. Implementations: OpenAI-compatible, Anthropic,
//! Google GenAI.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capability::ProviderKind;
use crate::error::ProviderError;
use crate::message::{ContentPart, Role};

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// How the caller wants the response shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Structured JSON output — only emitted when the resolved
    /// capabilities say the provider supports it.
    JsonObject,
}

/// One message in a request plan.
///
/// Plan messages are a deliberately thinner shape than archive
/// [`crate::message::Message`]s: no ids, no timestamps — identical inputs
/// must produce identical plans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl PlanMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::text(text)],
        }
    }

    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The complete, provider-independent request payload.
///
/// Built deterministically by the request builder; providers map it to
/// their native wire format without changing its meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPlan {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4")
    pub model: String,

    /// Ordered messages: system, sanitized history, current user turn
    pub messages: Vec<PlanMessage>,

    /// Available tools — empty when tools are unsupported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Requested response shape
    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl RequestPlan {
    /// A stable fingerprint of this plan, used to correlate terminal
    /// diagnostics with the request that failed. Never contains the
    /// request content itself.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        // First 16 hex chars are plenty for correlation.
        digest
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// A tool invocation requested by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the provider's tool_call id)
    pub call_id: String,

    /// Name of the tool to invoke, as emitted by the provider
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text (possibly empty — classified by the controller)
    pub content: String,

    /// Tool invocations requested by the model, in emission order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    /// Whether this is the "success status, nothing usable" case that
    /// the retry controller treats as retryable. Whitespace-only content
    /// counts as empty.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

/// The core Provider trait.
///
/// One implementation per backend kind. The pipeline calls `send()`
/// without knowing which provider is in play — pure polymorphism;
/// capability differences are data, not subclasses.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider instance.
    fn name(&self) -> &str;

    /// The wire-format kind, used for capability resolution.
    fn kind(&self) -> ProviderKind;

    /// Send a request and get a complete response.
    async fn send(&self, plan: RequestPlan) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> RequestPlan {
        RequestPlan {
            model: "gpt-4o".into(),
            messages: vec![
                PlanMessage::text(Role::System, "be brief"),
                PlanMessage::text(Role::User, "hello"),
            ],
            tools: vec![],
            response_format: ResponseFormat::Text,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(plan().fingerprint(), plan().fingerprint());
        assert_eq!(plan().fingerprint().len(), 16);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let mut other = plan();
        other.messages.push(PlanMessage::text(Role::User, "more"));
        assert_ne!(plan().fingerprint(), other.fingerprint());
    }

    #[test]
    fn empty_response_detection() {
        let resp = ProviderResponse {
            content: "   \n".into(),
            tool_calls: vec![],
            usage: None,
            model: "m".into(),
        };
        assert!(resp.is_empty());
    }

    #[test]
    fn tool_call_response_is_not_empty() {
        let resp = ProviderResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                name: "web_search".into(),
                arguments: serde_json::json!({}),
            }],
            usage: None,
            model: "m".into(),
        };
        assert!(!resp.is_empty());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "history_search".into(),
            description: "Search the conversation archive".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("history_search"));
        assert!(json.contains("query"));
    }
}
