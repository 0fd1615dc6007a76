//! # Palaver Core
//!
//! Domain types, traits, and error definitions for the Palaver chat
//! pipeline. This crate has **zero framework dependencies** — it defines
//! the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external seam (LLM provider, durable archive, tool handler,
//! summarizer/captioner collaborators) is defined as a trait here.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod capability;
pub mod collab;
pub mod degrade;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use capability::{CapabilityOverrides, ProviderCapabilities, ProviderKind};
pub use collab::{Captioner, CollabError, Summarizer};
pub use degrade::DegradeStep;
pub use error::{ContextError, Error, PipelineError, ProviderError, Result, ToolError};
pub use event::{DiagnosticBus, DiagnosticEvent};
pub use message::{ContentPart, Message, Role, SessionKey, SessionScope, Turn, group_turns};
pub use provider::{
    PlanMessage, Provider, ProviderResponse, RequestPlan, ResponseFormat, ToolCall,
    ToolDefinition, Usage,
};
pub use tool::{ToolHandler, ToolRegistry};
