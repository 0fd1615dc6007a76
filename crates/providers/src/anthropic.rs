//! Anthropic Messages API provider implementation.
//!
//! Maps the provider-neutral plan onto `/v1/messages`: system messages
//! are lifted into the top-level `system` field, tool results travel as
//! `tool_result` blocks inside user messages, assistant tool calls
//! become `tool_use` blocks, and data-URL images become base64 sources.
//! Non-inline image references degrade to a textual marker.

use async_trait::async_trait;
use palaver_core::capability::ProviderKind;
use palaver_core::error::ProviderError;
use palaver_core::message::{ContentPart, Role};
use palaver_core::provider::{
    PlanMessage, Provider, ProviderResponse, RequestPlan, ToolCall, ToolDefinition, Usage,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{check_tool_capability, map_status_error, map_transport_error, parse_data_url};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// An Anthropic Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    extra_headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        extra_headers: HashMap<String, String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            extra_headers,
            client,
        }
    }

    /// Split plan messages into (system text, converted messages).
    fn convert_messages(messages: &[PlanMessage]) -> (String, Vec<serde_json::Value>) {
        let mut system_chunks: Vec<String> = Vec::new();
        let mut converted: Vec<serde_json::Value> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    let text = msg.joined_text();
                    if !text.trim().is_empty() {
                        system_chunks.push(text);
                    }
                }
                Role::Tool => {
                    for part in &msg.parts {
                        if let ContentPart::ToolResult {
                            call_id, payload, ..
                        } = part
                        {
                            converted.push(serde_json::json!({
                                "role": "user",
                                "content": [{
                                    "type": "tool_result",
                                    "tool_use_id": call_id,
                                    "content": payload,
                                    "is_error": false,
                                }],
                            }));
                        }
                    }
                }
                Role::User | Role::Assistant => {
                    let role = if msg.role == Role::Assistant {
                        "assistant"
                    } else {
                        "user"
                    };
                    let mut blocks: Vec<serde_json::Value> = Vec::new();
                    for part in &msg.parts {
                        match part {
                            ContentPart::Text { text } => {
                                blocks.push(serde_json::json!({"type": "text", "text": text}));
                            }
                            ContentPart::Image { reference, .. } => {
                                match parse_data_url(reference) {
                                    Some((mime, data)) => blocks.push(serde_json::json!({
                                        "type": "image",
                                        "source": {
                                            "type": "base64",
                                            "media_type": mime,
                                            "data": data,
                                        },
                                    })),
                                    None => blocks.push(serde_json::json!({
                                        "type": "text",
                                        "text": format!("[image] {reference}"),
                                    })),
                                }
                            }
                            ContentPart::ToolCall {
                                call_id,
                                name,
                                arguments,
                            } => {
                                blocks.push(serde_json::json!({
                                    "type": "tool_use",
                                    "id": call_id,
                                    "name": name,
                                    "input": arguments,
                                }));
                            }
                            ContentPart::ToolResult { .. } => {
                                // Tool results belong to tool-role messages;
                                // skip silently if one strays here.
                            }
                        }
                    }
                    if !blocks.is_empty() {
                        converted.push(serde_json::json!({"role": role, "content": blocks}));
                    }
                }
            }
        }

        (system_chunks.join("\n\n"), converted)
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn send(&self, plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
        check_tool_capability(self.kind(), &plan)?;

        let url = format!("{}/messages", self.base_url);
        let (system, messages) = Self::convert_messages(&plan.messages);

        let mut body = serde_json::json!({
            "model": plan.model,
            "max_tokens": plan.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": plan.temperature,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }
        if !plan.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&plan.tools));
        }

        debug!(model = %plan.model, "Sending Anthropic messages request");

        let mut request = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");
        for (key, value) in &self.extra_headers {
            request = request.header(key, value);
        }

        let response = request.json(&body).send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic returned error");
            return Err(map_status_error(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let mut text_chunks: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for (index, block) in api_response.content.into_iter().enumerate() {
            match block {
                ApiContentBlock::Text { text } => {
                    if !text.is_empty() {
                        text_chunks.push(text);
                    }
                }
                ApiContentBlock::ToolUse { id, name, input } => {
                    let call_id = if id.is_empty() {
                        format!("anthropic_tool_{index}")
                    } else {
                        id
                    };
                    tool_calls.push(ToolCall {
                        call_id,
                        name,
                        arguments: input,
                    });
                }
            }
        }

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ProviderResponse {
            content: text_chunks.join("\n"),
            tool_calls,
            usage,
            model: api_response.model,
        })
    }
}

// --- Wire DTOs ---

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ApiContentBlock>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
