//! Content sanitization — projecting a working context through a
//! provider's declared capabilities.
//!
//! Sanitization is total: any well-formed working context produces a
//! valid sanitized context. Unsupported content never errors; it
//! degrades to textual substitutes. The archive keeps the originals.

use palaver_core::capability::ProviderCapabilities;
use palaver_core::collab::{Captioner, caption_with_timeout};
use palaver_core::message::{ContentPart, Message, Role};
use palaver_core::provider::PlanMessage;
use palaver_context::working::WorkingContext;
use std::time::Duration;
use tracing::debug;

/// Fixed substitute for an image the provider cannot see and no caption
/// is available for.
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// Sanitization inputs beyond the context itself.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// The caller asked for structured JSON output
    pub structured_output: bool,

    /// Captioner call deadline
    pub caption_timeout: Duration,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            structured_output: false,
            caption_timeout: Duration::from_secs(10),
        }
    }
}

/// The capability-clean projection handed to the request builder.
#[derive(Debug, Clone)]
pub struct SanitizedContext {
    /// Sanitized history (summary + retained turns), oldest first
    pub history: Vec<PlanMessage>,

    /// The sanitized current user turn
    pub current: PlanMessage,

    /// Capability-derived system directives (e.g. images downgraded)
    pub directives: Vec<String>,

    /// Whether the tool schema may be sent at all
    pub tools_supported: bool,

    /// The caller asked for structured output
    pub structured_output: bool,

    /// Structured output was requested but the provider lacks JSON mode;
    /// the builder falls back to delimited text
    pub json_fallback: bool,

    /// How many tool parts were removed from history
    pub dropped_tool_parts: usize,

    /// How many image parts were replaced with text
    pub downgraded_images: usize,
}

/// Project a working context plus the current message through provider
/// capabilities.
pub async fn sanitize(
    context: &WorkingContext,
    capabilities: &ProviderCapabilities,
    current: &Message,
    captioner: Option<&dyn Captioner>,
    options: &SanitizeOptions,
) -> SanitizedContext {
    let mut dropped_tool_parts = 0usize;
    let mut downgraded_images = 0usize;

    let mut history: Vec<PlanMessage> = Vec::new();
    for message in context.messages() {
        if let Some(plan_msg) = sanitize_message(
            message,
            capabilities,
            captioner,
            options.caption_timeout,
            &mut dropped_tool_parts,
            &mut downgraded_images,
        )
        .await
        {
            history.push(plan_msg);
        }
    }

    let current = sanitize_message(
        current,
        capabilities,
        captioner,
        options.caption_timeout,
        &mut dropped_tool_parts,
        &mut downgraded_images,
    )
    .await
    .unwrap_or_else(|| PlanMessage::text(Role::User, ""));

    let mut directives = Vec::new();
    if downgraded_images > 0 {
        directives.push(
            "Some images in this conversation were replaced with text descriptions. \
             Describe images in words instead of assuming you can see them."
                .to_string(),
        );
    }
    if dropped_tool_parts > 0 {
        directives.push("Earlier tool activity was omitted from this conversation.".to_string());
    }

    let json_fallback = options.structured_output && !capabilities.supports_json_mode;
    if dropped_tool_parts > 0 || downgraded_images > 0 || json_fallback {
        debug!(
            dropped_tool_parts,
            downgraded_images, json_fallback, "Sanitized context for provider capabilities"
        );
    }

    SanitizedContext {
        history,
        current,
        directives,
        tools_supported: capabilities.supports_tools,
        structured_output: options.structured_output,
        json_fallback,
        dropped_tool_parts,
        downgraded_images,
    }
}

/// Sanitize one message. Returns `None` when nothing presentable is
/// left (e.g. a tool-result message for a provider without tools).
async fn sanitize_message(
    message: &Message,
    capabilities: &ProviderCapabilities,
    captioner: Option<&dyn Captioner>,
    caption_timeout: Duration,
    dropped_tool_parts: &mut usize,
    downgraded_images: &mut usize,
) -> Option<PlanMessage> {
    let mut parts: Vec<ContentPart> = Vec::new();

    for part in &message.parts {
        match part {
            ContentPart::Text { text } => parts.push(ContentPart::text(text.clone())),
            ContentPart::Image { reference, mime } => {
                if capabilities.supports_images {
                    parts.push(ContentPart::image(reference.clone(), mime.clone()));
                } else {
                    *downgraded_images += 1;
                    parts.push(ContentPart::text(image_substitute(
                        reference,
                        captioner,
                        caption_timeout,
                    )
                    .await));
                }
            }
            ContentPart::ToolCall { .. } | ContentPart::ToolResult { .. } => {
                if capabilities.supports_tools {
                    parts.push(part.clone());
                } else {
                    *dropped_tool_parts += 1;
                }
            }
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(PlanMessage {
        role: message.role,
        parts,
    })
}

/// Caption an image if a captioner is configured and answers in time;
/// otherwise the fixed placeholder. Never blocks the pipeline
/// indefinitely and never errors.
async fn image_substitute(
    reference: &str,
    captioner: Option<&dyn Captioner>,
    timeout: Duration,
) -> String {
    if let Some(captioner) = captioner {
        match caption_with_timeout(captioner, reference, timeout).await {
            Ok(caption) if !caption.trim().is_empty() => {
                return format!("[image: {}]", caption.trim());
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Captioner failed, using placeholder");
            }
        }
    }
    IMAGE_PLACEHOLDER.to_string()
}
