//! History search tool — lets the model search the session's own
//! durable archive.
//!
//! This is the read-only audit path over the archive: trimming shapes
//! the request window, but everything a session ever said stays
//! queryable here.

use async_trait::async_trait;
use palaver_core::error::ToolError;
use palaver_core::message::SessionKey;
use palaver_core::tool::ToolHandler;
use palaver_context::{ArchiveFilter, ArchiveStore};
use serde::Serialize;
use std::sync::Arc;

/// Searches the conversation archive of the session it was built for.
///
/// Constructed per session by the adapter layer, so the session key
/// never travels through tool arguments.
pub struct HistorySearchTool {
    archive: Arc<dyn ArchiveStore>,
    session_key: SessionKey,
}

impl HistorySearchTool {
    pub fn new(archive: Arc<dyn ArchiveStore>, session_key: SessionKey) -> Self {
        Self {
            archive,
            session_key,
        }
    }
}

#[derive(Serialize)]
struct HistoryHit {
    role: &'static str,
    text: String,
    turn_index: u64,
    created_at: String,
}

#[async_trait]
impl ToolHandler for HistorySearchTool {
    fn name(&self) -> &str {
        "history_search"
    }

    fn description(&self) -> &str {
        "Search earlier messages in this conversation, including ones that are no longer \
         in the visible context window. Use this to recall what was said before."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to look for in earlier messages"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let limit = arguments["limit"].as_u64().unwrap_or(5).min(50) as usize;

        let filter = ArchiveFilter {
            role: None,
            contains: Some(query.to_string()),
            limit,
        };
        let messages = self
            .archive
            .query(&self.session_key, &filter)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "history_search".into(),
                reason: e.to_string(),
            })?;

        if messages.is_empty() {
            return Ok(format!("No earlier messages matching '{query}'."));
        }

        let hits: Vec<HistoryHit> = messages
            .iter()
            .map(|m| HistoryHit {
                role: m.role.as_str(),
                text: m.joined_text(),
                turn_index: m.turn_index,
                created_at: m.created_at.to_rfc3339(),
            })
            .collect();
        serde_json::to_string_pretty(&hits).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "history_search".into(),
            reason: e.to_string(),
        })
    }
}
