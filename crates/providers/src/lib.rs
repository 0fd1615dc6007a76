//! LLM provider implementations for Palaver.
//!
//! One implementation per wire format. Each maps the provider-neutral
//! `RequestPlan` to the backend's native request shape and parses the
//! response back into a `ProviderResponse`, without changing meaning.

pub mod anthropic;
pub mod google;
pub mod openai_compat;

pub use anthropic::AnthropicProvider;
pub use google::GoogleGenAiProvider;
pub use openai_compat::OpenAiCompatProvider;

use palaver_config::ProviderConfig;
use palaver_core::capability::{self, CapabilityOverrides, ProviderKind};
use palaver_core::error::ProviderError;
use palaver_core::provider::{Provider, RequestPlan};
use std::sync::Arc;

/// Construct the provider named by the configuration.
pub fn make_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    let kind = ProviderKind::parse(&config.kind);
    let api_key = config.api_key.clone().unwrap_or_default();
    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::OpenAiCompat => Arc::new(OpenAiCompatProvider::new(
            "openai_compat",
            &config.base_url,
            api_key,
            config.request_timeout(),
            config.extra_headers.clone(),
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            &config.base_url,
            api_key,
            config.request_timeout(),
            config.extra_headers.clone(),
        )),
        ProviderKind::GoogleGenAi => Arc::new(GoogleGenAiProvider::new(
            &config.base_url,
            api_key,
            config.request_timeout(),
            config.extra_headers.clone(),
        )),
    };
    Ok(provider)
}

/// Guard shared by all providers: a plan carrying a tool schema toward a
/// backend whose inferred capabilities exclude tools is a doomed request
/// and must be reported distinctly, not as a generic API error.
pub(crate) fn check_tool_capability(
    kind: ProviderKind,
    plan: &RequestPlan,
) -> Result<(), ProviderError> {
    if plan.tools.is_empty() {
        return Ok(());
    }
    let caps = capability::resolve(kind, &plan.model, &CapabilityOverrides::default());
    if !caps.supports_tools {
        return Err(ProviderError::CapabilityMismatch(format!(
            "model '{}' on {} does not accept a tool schema",
            plan.model, kind
        )));
    }
    Ok(())
}

/// Split a `data:` URL into (mime type, base64 payload).
pub(crate) fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().unwrap_or("").trim();
    let mime = if mime.is_empty() { "image/jpeg" } else { mime };
    Some((mime.to_string(), payload.to_string()))
}

/// Map a reqwest failure to the provider error taxonomy. Timeouts are
/// distinct so the controller can retry them as transport failures.
pub(crate) fn map_transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Map a non-200 HTTP status plus body to a provider error.
pub(crate) fn map_status_error(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => {
            ProviderError::AuthenticationFailed("Invalid API key or insufficient permissions".into())
        }
        400 if body_mentions_unsupported_tools(&body) => ProviderError::CapabilityMismatch(body),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

fn body_mentions_unsupported_tools(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("tool")
        && (lowered.contains("not support") || lowered.contains("unsupported"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::message::Role;
    use palaver_core::provider::{PlanMessage, ResponseFormat, ToolDefinition};

    fn plan_with_tools(model: &str) -> RequestPlan {
        RequestPlan {
            model: model.into(),
            messages: vec![PlanMessage::text(Role::User, "hi")],
            tools: vec![ToolDefinition {
                name: "t".into(),
                description: "d".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            response_format: ResponseFormat::Text,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn tool_schema_to_toolless_model_is_capability_mismatch() {
        let err = check_tool_capability(
            ProviderKind::OpenAiCompat,
            &plan_with_tools("text-embedding-3-small"),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::CapabilityMismatch(_)));
    }

    #[test]
    fn tool_schema_to_capable_model_passes() {
        assert!(check_tool_capability(ProviderKind::Anthropic, &plan_with_tools("claude-3")).is_ok());
    }

    #[test]
    fn data_url_parsing() {
        let (mime, payload) = parse_data_url("data:image/png;base64,AAAA").unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(payload, "AAAA");
        assert!(parse_data_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            map_status_error(429, String::new()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            map_status_error(401, String::new()),
            ProviderError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            map_status_error(400, "tools are not supported for this model".into()),
            ProviderError::CapabilityMismatch(_)
        ));
        assert!(matches!(
            map_status_error(500, "boom".into()),
            ProviderError::ApiError {
                status_code: 500,
                ..
            }
        ));
    }
}
