//! Diagnostic event system — decoupled observability for the pipeline.
//!
//! Events are published at every decision point (attempts, retries,
//! degradations, tool executions, terminal failures) with enough
//! correlation data to reconstruct the decision path after the fact.
//! Consumers subscribe without coupling to the pipeline internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All diagnostic events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DiagnosticEvent {
    /// A new user request entered the pipeline
    RequestStarted {
        session_key: String,
        request_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The working context was trimmed while building a request
    ContextTrimmed {
        session_key: String,
        turns_dropped: usize,
        token_estimate: usize,
        timestamp: DateTime<Utc>,
    },

    /// One pipeline attempt finished (success or classified failure)
    AttemptFinished {
        session_key: String,
        request_id: String,
        attempt: u32,
        degrade_level: u8,
        classification: String,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The degradation level was escalated
    DegradationEscalated {
        session_key: String,
        request_id: String,
        from_level: u8,
        to_level: u8,
        timestamp: DateTime<Utc>,
    },

    /// A tool call was resolved (executed, rejected, or errored)
    ToolExecuted {
        request_id: String,
        round_index: u32,
        tool_name: String,
        success: bool,
        blocked: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A reply was produced and is about to be delivered
    ReplyDelivered {
        session_key: String,
        request_id: String,
        degrade_level: u8,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The request failed terminally. This record — not a stack trace —
    /// is what reaches observability.
    TerminalFailure {
        session_key: String,
        request_id: String,
        classification: String,
        degrade_level: u8,
        attempts: u32,
        fingerprint: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based bus for diagnostic events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components
/// subscribe to receive all events and filter for what they care about.
pub struct DiagnosticBus {
    sender: broadcast::Sender<Arc<DiagnosticEvent>>,
}

impl DiagnosticBus {
    /// Create a new bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DiagnosticEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DiagnosticEvent>> {
        self.sender.subscribe()
    }
}

impl Default for DiagnosticBus {
    fn default() -> Self {
        Self::new(256)
    }
}
