//! Error types for the Palaver domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Palaver operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context store errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Pipeline errors ---
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors from the durable context store.
///
/// Store I/O failures are retryable at the orchestrator's discretion —
/// they are surfaced, never silently swallowed.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Context store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupted archive record: {0}")]
    Corrupted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The provider cannot satisfy a requested feature (e.g. tool schema
    /// sent to a backend that does not support tool calling). Reported
    /// distinctly from generic errors so the controller can avoid
    /// repeating a doomed request.
    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Policy rejection — not an error to the end user. The round is
    /// resolved with a fixed "not permitted" result instead.
    #[error("Tool not allowed by policy: {tool_name}")]
    NotAllowed { tool_name: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Provider returned success status with null/empty content.
    #[error("Provider returned an empty response")]
    EmptyResponse,

    /// The tool loop hit its round bound without a final text response.
    #[error("Tool loop exhausted after {rounds} round(s)")]
    ToolLoopExhausted { rounds: u32 },

    /// Every degradation level was tried and the provider still misbehaved.
    #[error("Degradation ladder exhausted at level {level} after {attempts} attempt(s)")]
    DegradationExhausted { level: u8, attempts: u32 },
}
