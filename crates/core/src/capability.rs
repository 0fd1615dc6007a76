//! Provider capability negotiation.
//!
//! Capability differences between backends are data (a static table keyed
//! by provider kind), not inheritance. Explicit configuration overrides
//! always win over the inferred defaults.

use serde::{Deserialize, Serialize};

/// The supported LLM backend wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompat,
    Anthropic,
    GoogleGenAi,
}

impl ProviderKind {
    /// Parse a configured provider name. Unknown values fall back to the
    /// OpenAI-compatible mode for backward compatibility.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Self::Anthropic,
            "google_genai" => Self::GoogleGenAi,
            _ => Self::OpenAiCompat,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompat => "openai_compat",
            Self::Anthropic => "anthropic",
            Self::GoogleGenAi => "google_genai",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a provider can accept in a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    /// Tool / function calling
    pub supports_tools: bool,
    /// Image content parts in messages
    pub supports_images: bool,
    /// Structured JSON output mode
    pub supports_json_mode: bool,
}

impl ProviderCapabilities {
    pub const NONE: Self = Self {
        supports_tools: false,
        supports_images: false,
        supports_json_mode: false,
    };
}

/// Explicit configuration overrides. A `Some` value always takes
/// precedence over the static per-kind default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_tools: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_json_mode: Option<bool>,
}

/// Resolve effective capabilities for one request.
///
/// Pure function: static defaults by kind, adjusted for embedding-style
/// models (which accept neither tools nor images), then explicit
/// overrides applied last.
pub fn resolve(
    kind: ProviderKind,
    model: &str,
    overrides: &CapabilityOverrides,
) -> ProviderCapabilities {
    let mut caps = match kind {
        ProviderKind::OpenAiCompat => ProviderCapabilities {
            supports_tools: true,
            supports_images: true,
            supports_json_mode: true,
        },
        ProviderKind::Anthropic | ProviderKind::GoogleGenAi => ProviderCapabilities {
            supports_tools: true,
            supports_images: true,
            supports_json_mode: false,
        },
    };

    if model.to_ascii_lowercase().contains("embedding") {
        caps = ProviderCapabilities::NONE;
    }

    if let Some(v) = overrides.supports_tools {
        caps.supports_tools = v;
    }
    if let Some(v) = overrides.supports_images {
        caps.supports_images = v;
    }
    if let Some(v) = overrides.supports_json_mode {
        caps.supports_json_mode = v;
    }
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_compat_enables_json_mode() {
        let caps = resolve(
            ProviderKind::OpenAiCompat,
            "gpt-4o-mini",
            &CapabilityOverrides::default(),
        );
        assert!(caps.supports_tools);
        assert!(caps.supports_images);
        assert!(caps.supports_json_mode);
    }

    #[test]
    fn anthropic_disables_json_mode() {
        let caps = resolve(
            ProviderKind::Anthropic,
            "claude-sonnet-4-20250514",
            &CapabilityOverrides::default(),
        );
        assert!(caps.supports_tools);
        assert!(caps.supports_images);
        assert!(!caps.supports_json_mode);
    }

    #[test]
    fn google_genai_disables_json_mode() {
        let caps = resolve(
            ProviderKind::GoogleGenAi,
            "gemini-2.5-flash",
            &CapabilityOverrides::default(),
        );
        assert!(caps.supports_tools);
        assert!(!caps.supports_json_mode);
    }

    #[test]
    fn embedding_model_disables_everything() {
        let caps = resolve(
            ProviderKind::OpenAiCompat,
            "text-embedding-3-small",
            &CapabilityOverrides::default(),
        );
        assert_eq!(caps, ProviderCapabilities::NONE);
    }

    #[test]
    fn explicit_override_wins_over_defaults() {
        let overrides = CapabilityOverrides {
            supports_tools: Some(false),
            supports_images: None,
            supports_json_mode: Some(true),
        };
        let caps = resolve(ProviderKind::Anthropic, "claude-sonnet-4", &overrides);
        assert!(!caps.supports_tools);
        assert!(caps.supports_images);
        assert!(caps.supports_json_mode);
    }

    #[test]
    fn unknown_kind_parses_as_openai_compat() {
        assert_eq!(ProviderKind::parse("my-proxy"), ProviderKind::OpenAiCompat);
        assert_eq!(ProviderKind::parse("ANTHROPIC"), ProviderKind::Anthropic);
    }
}
