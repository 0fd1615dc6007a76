//! Configuration loading, validation, and management for Palaver.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides for secrets. Validates all settings at startup.

use palaver_core::capability::CapabilityOverrides;
use palaver_core::degrade::DegradeStep;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct PalaverConfig {
    /// System instructions prepended to every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Provider configuration
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Context store and budget configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Tool loop configuration
    #[serde(default)]
    pub tools: ToolConfig,

    /// Retry and degradation configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-session locking configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// User-visible message templates
    #[serde(default)]
    pub messages: MessagesConfig,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for PalaverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PalaverConfig")
            .field("system_prompt", &self.system_prompt)
            .field("provider", &self.provider)
            .field("context", &self.context)
            .field("tools", &self.tools)
            .field("retry", &self.retry)
            .field("session", &self.session)
            .field("messages", &self.messages)
            .finish()
    }
}

/// LLM provider configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind: "openai_compat" | "anthropic" | "google_genai"
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (or set PALAVER_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-request transport timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Extra HTTP headers sent with every request
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    /// Explicit capability overrides — always win over the per-kind
    /// defaults.
    #[serde(default)]
    pub capabilities: CapabilityOverrides,
}

fn default_provider_kind() -> String {
    "openai_compat".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            extra_headers: HashMap::new(),
            capabilities: CapabilityOverrides::default(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Context store and working-context budget configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum turns in a working context
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Soft token budget for a working context
    #[serde(default = "default_max_tokens_soft")]
    pub max_tokens_soft: usize,

    /// Synthesize a summary message for dropped turns
    #[serde(default)]
    pub summarize: bool,

    /// Summarizer call deadline in seconds
    #[serde(default = "default_collab_timeout_secs")]
    pub summarize_timeout_secs: u64,

    /// Captioner call deadline in seconds
    #[serde(default = "default_collab_timeout_secs")]
    pub caption_timeout_secs: u64,

    /// SQLite database path ("" = in-memory archive)
    #[serde(default)]
    pub database_path: String,
}

fn default_max_turns() -> usize {
    30
}
fn default_max_tokens_soft() -> usize {
    8192
}
fn default_collab_timeout_secs() -> u64 {
    10
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_tokens_soft: default_max_tokens_soft(),
            summarize: false,
            summarize_timeout_secs: default_collab_timeout_secs(),
            caption_timeout_secs: default_collab_timeout_secs(),
            database_path: String::new(),
        }
    }
}

impl ContextConfig {
    pub fn summarize_timeout(&self) -> Duration {
        Duration::from_secs(self.summarize_timeout_secs)
    }

    pub fn caption_timeout(&self) -> Duration {
        Duration::from_secs(self.caption_timeout_secs)
    }
}

/// Tool loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Maximum tool rounds per request
    #[serde(default = "default_tool_max_rounds")]
    pub max_rounds: u32,

    /// Per-tool-call timeout in seconds (0 = no timeout)
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,

    /// Hard cap on tool result length in characters
    #[serde(default = "default_tool_result_max_chars")]
    pub result_max_chars: usize,

    /// Explicit tool allowlist; absent = all registered tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<Vec<String>>,
}

fn default_tool_max_rounds() -> u32 {
    5
}
fn default_tool_timeout_secs() -> u64 {
    20
}
fn default_tool_result_max_chars() -> usize {
    2000
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_tool_max_rounds(),
            timeout_secs: default_tool_timeout_secs(),
            result_max_chars: default_tool_result_max_chars(),
            allowlist: None,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retry and degradation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Local replays of a transport-timed-out request
    #[serde(default = "default_transport_timeout_retries")]
    pub transport_timeout_retries: u32,

    /// Fixed delay between transport replays, in milliseconds
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,

    /// Local replays of an empty-but-successful response
    #[serde(default = "default_empty_reply_local_retries")]
    pub empty_reply_local_retries: u32,

    /// Fixed delay between empty-reply replays, in milliseconds
    #[serde(default = "default_empty_reply_retry_delay_ms")]
    pub empty_reply_retry_delay_ms: u64,

    /// Whether repeated empty replies escalate the degradation ladder
    #[serde(default = "default_true")]
    pub degradation_enabled: bool,

    /// The degradation ladder, applied cumulatively: level N applies the
    /// first N steps. The maximum level is the ladder length.
    #[serde(default = "default_degrade_ladder")]
    pub degrade_ladder: Vec<DegradeStep>,

    /// Successive turn caps used by tighten_turns steps, in order of
    /// occurrence in the ladder.
    #[serde(default = "default_degraded_turn_caps")]
    pub degraded_turn_caps: Vec<usize>,
}

fn default_transport_timeout_retries() -> u32 {
    1
}
fn default_transport_retry_delay_ms() -> u64 {
    600
}
fn default_empty_reply_local_retries() -> u32 {
    1
}
fn default_empty_reply_retry_delay_ms() -> u64 {
    400
}
fn default_true() -> bool {
    true
}
fn default_degrade_ladder() -> Vec<DegradeStep> {
    vec![
        DegradeStep::DropToolTraces,
        DegradeStep::CollapseImages,
        DegradeStep::TightenTurns,
    ]
}
fn default_degraded_turn_caps() -> Vec<usize> {
    vec![10, 2]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transport_timeout_retries: default_transport_timeout_retries(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
            empty_reply_local_retries: default_empty_reply_local_retries(),
            empty_reply_retry_delay_ms: default_empty_reply_retry_delay_ms(),
            degradation_enabled: true,
            degrade_ladder: default_degrade_ladder(),
            degraded_turn_caps: default_degraded_turn_caps(),
        }
    }
}

impl RetryConfig {
    pub fn transport_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transport_retry_delay_ms)
    }

    pub fn empty_reply_retry_delay(&self) -> Duration {
        Duration::from_millis(self.empty_reply_retry_delay_ms)
    }

    /// The highest degradation level: one per ladder step, or zero when
    /// degradation is disabled.
    pub fn max_degrade_level(&self) -> u8 {
        if self.degradation_enabled {
            self.degrade_ladder.len().min(u8::MAX as usize) as u8
        } else {
            0
        }
    }
}

/// Per-session lock map configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum tracked per-session locks before eviction
    #[serde(default = "default_max_locks")]
    pub max_locks: usize,

    /// Idle lock time-to-live in seconds
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

fn default_max_locks() -> usize {
    512
}
fn default_lock_ttl_secs() -> u64 {
    600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_locks: default_max_locks(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// User-visible message templates. Terminal failures always surface one
/// stable, non-leaking message — never a stack trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "default_generic_failure")]
    pub generic_failure: String,
}

fn default_generic_failure() -> String {
    "Something went wrong while generating a reply. Please try again in a moment.".into()
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            generic_failure: default_generic_failure(),
        }
    }
}

impl PalaverConfig {
    /// Load configuration from a file path, with environment overrides.
    ///
    /// A missing file yields the defaults. `PALAVER_API_KEY` overrides
    /// the configured key; `PALAVER_MODEL` overrides the model.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            toml::from_str::<Self>(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Self::default()
        };

        if let Ok(key) = std::env::var("PALAVER_API_KEY") {
            config.provider.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("PALAVER_MODEL") {
            config.provider.model = model;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.context.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_turns must be at least 1".into(),
            ));
        }
        if self.tools.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "tools.max_rounds must be at least 1".into(),
            ));
        }
        if self.tools.result_max_chars < 200 {
            return Err(ConfigError::ValidationError(
                "tools.result_max_chars must be at least 200".into(),
            ));
        }
        let tighten_steps = self
            .retry
            .degrade_ladder
            .iter()
            .filter(|s| matches!(s, DegradeStep::TightenTurns))
            .count();
        if tighten_steps > self.retry.degraded_turn_caps.len() {
            return Err(ConfigError::ValidationError(
                "retry.degraded_turn_caps must provide a cap for every tighten_turns step".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for PalaverConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            provider: ProviderConfig::default(),
            context: ContextConfig::default(),
            tools: ToolConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            messages: MessagesConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PalaverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_degrade_level(), 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = PalaverConfig::load_from(Path::new("/nonexistent/palaver.toml")).unwrap();
        assert_eq!(config.context.max_turns, 30);
    }

    #[test]
    fn parses_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
system_prompt = "You are Palaver."

[provider]
kind = "anthropic"
model = "claude-sonnet-4"

[retry]
degradation_enabled = false
degrade_ladder = ["drop_tool_traces", "tighten_turns"]
"#
        )
        .unwrap();

        let config = PalaverConfig::load_from(file.path()).unwrap();
        assert_eq!(config.provider.kind, "anthropic");
        assert_eq!(config.retry.degrade_ladder.len(), 2);
        // Disabled degradation caps the level at zero
        assert_eq!(config.retry.max_degrade_level(), 0);
        // Untouched sections keep their defaults
        assert_eq!(config.tools.max_rounds, 5);
    }

    #[test]
    fn rejects_zero_rounds() {
        let mut config = PalaverConfig::default();
        config.tools.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_turn_caps() {
        let mut config = PalaverConfig::default();
        config.retry.degrade_ladder = vec![DegradeStep::TightenTurns, DegradeStep::TightenTurns];
        config.retry.degraded_turn_caps = vec![10];
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = PalaverConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn capability_overrides_parse_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[provider.capabilities]
supports_tools = false
"#
        )
        .unwrap();
        let config = PalaverConfig::load_from(file.path()).unwrap();
        assert_eq!(config.provider.capabilities.supports_tools, Some(false));
        assert_eq!(config.provider.capabilities.supports_images, None);
    }
}
