//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM, and any endpoint exposing
//! an OpenAI-compatible `/chat/completions` route. Supports tool calling,
//! multimodal content arrays, and `json_object` response format.

use async_trait::async_trait;
use palaver_core::capability::ProviderKind;
use palaver_core::error::ProviderError;
use palaver_core::message::{ContentPart, Role};
use palaver_core::provider::{
    PlanMessage, Provider, ProviderResponse, RequestPlan, ResponseFormat, ToolCall,
    ToolDefinition, Usage,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{check_tool_capability, map_status_error, map_transport_error};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    extra_headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
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
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            extra_headers,
            client,
        }
    }

    /// Convert plan messages to the OpenAI wire shape.
    fn to_api_messages(messages: &[PlanMessage]) -> Vec<serde_json::Value> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            match msg.role {
                Role::Tool => {
                    // Each tool result becomes its own wire message.
                    for part in &msg.parts {
                        if let ContentPart::ToolResult {
                            call_id,
                            name,
                            payload,
                            ..
                        } = part
                        {
                            out.push(serde_json::json!({
                                "role": "tool",
                                "tool_call_id": call_id,
                                "name": name,
                                "content": payload,
                            }));
                        }
                    }
                }
                Role::Assistant => {
                    let mut body = serde_json::json!({
                        "role": "assistant",
                        "content": msg.joined_text(),
                    });
                    let tool_calls: Vec<serde_json::Value> = msg
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall {
                                call_id,
                                name,
                                arguments,
                            } => Some(serde_json::json!({
                                "id": call_id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": arguments.to_string(),
                                },
                            })),
                            _ => None,
                        })
                        .collect();
                    if !tool_calls.is_empty() {
                        body["tool_calls"] = serde_json::Value::Array(tool_calls);
                    }
                    out.push(body);
                }
                Role::User | Role::System => {
                    let role = msg.role.as_str();
                    let has_images = msg
                        .parts
                        .iter()
                        .any(|p| matches!(p, ContentPart::Image { .. }));
                    if !has_images {
                        out.push(serde_json::json!({
                            "role": role,
                            "content": msg.joined_text(),
                        }));
                        continue;
                    }
                    let parts: Vec<serde_json::Value> = msg
                        .parts
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::Text { text } => {
                                Some(serde_json::json!({"type": "text", "text": text}))
                            }
                            ContentPart::Image { reference, .. } => Some(serde_json::json!({
                                "type": "image_url",
                                "image_url": {"url": reference},
                            })),
                            _ => None,
                        })
                        .collect();
                    out.push(serde_json::json!({"role": role, "content": parts}));
                }
            }
        }
        out
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiCompat
    }

    async fn send(&self, plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
        check_tool_capability(self.kind(), &plan)?;

        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": plan.model,
            "messages": Self::to_api_messages(&plan.messages),
            "temperature": plan.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = plan.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !plan.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&plan.tools));
        }
        if plan.response_format == ResponseFormat::JsonObject {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        debug!(provider = %self.name, model = %plan.model, "Sending completion request");

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        for (key, value) in &self.extra_headers {
            request = request.header(key, value);
        }

        let response = request.json(&body).send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(map_status_error(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                call_id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({"input": tc.function.arguments})),
            })
            .collect();

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
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
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
