//! The Palaver request pipeline.
//!
//! Sequences one incoming chat event through the context store, content
//! sanitizer, request builder, and bounded tool-call loop, wrapped by a
//! retry/degradation controller that behaves deterministically under
//! partial failure.
//!
//! Control flow:
//! `event → context store (read + append) → request builder (capability
//! registry + sanitizer) → tool loop (may re-enter the builder) →
//! retry/degradation controller (may re-enter the whole chain) → reply`

pub mod builder;
pub mod controller;
pub mod degrade;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod sanitize;
pub mod tool_loop;
pub mod transport;

pub use builder::{BuildInputs, build, parse_delimited};
pub use controller::{
    AttemptFailure, AttemptReport, FailureClass, RetryController, TerminalDiagnostic,
    TerminalError,
};
pub use degrade::DegradeLadder;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use orchestrator::{ChatPipeline, ImageAttachment, IncomingMessage, OutgoingReply};
pub use sanitize::{IMAGE_PLACEHOLDER, SanitizeOptions, SanitizedContext, sanitize};
pub use tool_loop::{LoopRun, ToolLoop, ToolLoopSettings};
pub use transport::Transport;
