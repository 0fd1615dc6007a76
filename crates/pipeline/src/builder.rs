//! Request building — assembling the final provider payload.
//!
//! # Determinism
//!
//! Building is deterministic: identical inputs always produce identical
//! plans. No randomness, no clock reads beyond timestamps already
//! present in messages.

use palaver_core::provider::{PlanMessage, RequestPlan, ResponseFormat, ToolDefinition};
use palaver_core::message::Role;

use crate::sanitize::SanitizedContext;

/// Markers for the delimited-text fallback when structured output was
/// requested but the provider has no JSON mode.
pub const DELIMITED_BEGIN: &str = "<<<REPLY>>>";
pub const DELIMITED_END: &str = "<<<END>>>";

/// Everything the builder needs for one plan.
pub struct BuildInputs<'a> {
    pub sanitized: &'a SanitizedContext,
    pub system_instructions: &'a str,
    pub tool_schema: &'a [ToolDefinition],
    pub model: &'a str,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

/// Assemble the complete request payload: system message first
/// (instructions plus capability-derived directives), then sanitized
/// history, then the current user turn.
pub fn build(inputs: &BuildInputs<'_>) -> RequestPlan {
    let sanitized = inputs.sanitized;

    let mut system_sections: Vec<String> = vec![inputs.system_instructions.to_string()];
    system_sections.extend(sanitized.directives.iter().cloned());
    if sanitized.json_fallback {
        system_sections.push(format!(
            "Reply with plain text placed between the markers {DELIMITED_BEGIN} and \
             {DELIMITED_END}. Do not emit JSON."
        ));
    }
    let system_text = system_sections
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut messages: Vec<PlanMessage> = Vec::with_capacity(sanitized.history.len() + 2);
    messages.push(PlanMessage::text(Role::System, system_text));
    messages.extend(sanitized.history.iter().cloned());
    messages.push(sanitized.current.clone());

    let tools = if sanitized.tools_supported {
        inputs.tool_schema.to_vec()
    } else {
        Vec::new()
    };

    let response_format = if sanitized.structured_output && !sanitized.json_fallback {
        ResponseFormat::JsonObject
    } else {
        ResponseFormat::Text
    };

    RequestPlan {
        model: inputs.model.to_string(),
        messages,
        tools,
        response_format,
        temperature: inputs.temperature,
        max_tokens: inputs.max_tokens,
    }
}

/// Leniently extract the reply from a delimited-text response. Accepts
/// missing markers, returning the trimmed whole text instead.
pub fn parse_delimited(text: &str) -> &str {
    let after_begin = text
        .split_once(DELIMITED_BEGIN)
        .map_or(text, |(_, rest)| rest);
    let inner = after_begin
        .split_once(DELIMITED_END)
        .map_or(after_begin, |(inner, _)| inner);
    inner.trim()
}
