//! Google Generative AI provider implementation.
//!
//! Maps the provider-neutral plan onto `models/<model>:generateContent`:
//! history becomes `contents` with `user`/`model` roles, system messages
//! become `systemInstruction`, tool calls travel as `functionCall` /
//! `functionResponse` parts, and data-URL images become `inline_data`.

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

/// A Google Generative Language API provider.
pub struct GoogleGenAiProvider {
    base_url: String,
    api_key: String,
    extra_headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl GoogleGenAiProvider {
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

    /// Split plan messages into (system text, contents).
    fn convert_messages(messages: &[PlanMessage]) -> (String, Vec<serde_json::Value>) {
        let mut system_chunks: Vec<String> = Vec::new();
        let mut contents: Vec<serde_json::Value> = Vec::new();

        for msg in messages {
            if msg.role == Role::System {
                let text = msg.joined_text();
                if !text.trim().is_empty() {
                    system_chunks.push(text);
                }
                continue;
            }

            let genai_role = if msg.role == Role::Assistant {
                "model"
            } else {
                "user"
            };
            let mut parts: Vec<serde_json::Value> = Vec::new();

            for part in &msg.parts {
                match part {
                    ContentPart::Text { text } => {
                        parts.push(serde_json::json!({"text": text}));
                    }
                    ContentPart::Image { reference, .. } => match parse_data_url(reference) {
                        Some((mime, data)) => parts.push(serde_json::json!({
                            "inline_data": {"mime_type": mime, "data": data},
                        })),
                        None => parts.push(serde_json::json!({
                            "text": format!("[image] {reference}"),
                        })),
                    },
                    ContentPart::ToolCall {
                        name, arguments, ..
                    } => {
                        parts.push(serde_json::json!({
                            "functionCall": {"name": name, "args": arguments},
                        }));
                    }
                    ContentPart::ToolResult { name, payload, .. } => {
                        parts.push(serde_json::json!({
                            "functionResponse": {
                                "name": name,
                                "response": {"content": payload},
                            },
                        }));
                    }
                }
            }

            if !parts.is_empty() {
                contents.push(serde_json::json!({"role": genai_role, "parts": parts}));
            }
        }

        (system_chunks.join("\n\n"), contents)
    }

    fn to_function_declarations(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Provider for GoogleGenAiProvider {
    fn name(&self) -> &str {
        "google_genai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleGenAi
    }

    async fn send(&self, plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
        check_tool_capability(self.kind(), &plan)?;

        let url = format!("{}/models/{}:generateContent", self.base_url, plan.model);
        let (system, contents) = Self::convert_messages(&plan.messages);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {"temperature": plan.temperature},
        });
        if let Some(max_tokens) = plan.max_tokens {
            body["generationConfig"]["maxOutputTokens"] = serde_json::json!(max_tokens);
        }
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        if !plan.tools.is_empty() {
            body["tools"] = serde_json::json!([{
                "functionDeclarations": Self::to_function_declarations(&plan.tools),
            }]);
        }

        debug!(model = %plan.model, "Sending GenAI generateContent request");

        let mut request = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json");
        for (key, value) in &self.extra_headers {
            request = request.header(key, value);
        }

        let response = request.json(&body).send().await.map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "GenAI returned error");
            return Err(map_status_error(status, error_body));
        }

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let candidate = api_response.candidates.into_iter().next().unwrap_or_default();
        let mut text_chunks: Vec<String> = Vec::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for (index, part) in candidate.content.parts.into_iter().enumerate() {
            if let Some(text) = part.text {
                if !text.trim().is_empty() {
                    text_chunks.push(text);
                }
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    call_id: format!("genai_tool_{index}"),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let usage = api_response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(ProviderResponse {
            content: text_chunks.join("\n"),
            tool_calls,
            usage,
            model: plan.model,
        })
    }
}

// --- Wire DTOs ---

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<ApiUsageMetadata>,
}

#[derive(Default, Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: ApiCandidateContent,
}

#[derive(Default, Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Deserialize)]
struct ApiPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<ApiFunctionCall>,
}

#[derive(Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u32,
}
