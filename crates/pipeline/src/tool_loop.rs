//! The bounded tool-call loop.
//!
//! States: `AWAIT_RESPONSE → EXECUTE_TOOLS → APPEND_RESULTS →
//! AWAIT_RESPONSE`, terminating in a final text or the round limit.
//!
//! Per round, every requested call is checked against the allowlist
//! before execution: disallowed calls never reach a handler — they
//! resolve immediately with a fixed "not permitted" result so the model
//! can adapt. Calls run sequentially in emission order (handlers may
//! share mutable resources), results are length-capped *before* being
//! folded back into context, and every round is recorded as archive
//! messages whatever its outcome.

use chrono::Utc;
use palaver_core::error::{ProviderError, ToolError};
use palaver_core::event::{DiagnosticBus, DiagnosticEvent};
use palaver_core::message::{ContentPart, Message, Role};
use palaver_core::provider::{PlanMessage, RequestPlan, ToolCall};
use palaver_core::tool::ToolRegistry;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::metrics::PipelineMetrics;
use crate::transport::Transport;

/// Loop bounds and per-call limits.
#[derive(Debug, Clone)]
pub struct ToolLoopSettings {
    /// Maximum provider responses carrying tool calls
    pub max_rounds: u32,

    /// Per-tool-call deadline (zero = no deadline)
    pub tool_timeout: Duration,

    /// Hard cap on tool result length in characters
    pub result_max_chars: usize,
}

/// What one loop execution produced.
pub struct LoopRun {
    /// The final text, or `None` when the round limit was exceeded
    pub reply: Option<String>,

    /// How many tool rounds were processed
    pub rounds: u32,

    /// Archive-bound messages for every round (assistant tool calls and
    /// tool results), in append order
    pub messages: Vec<Message>,
}

/// One bounded loop execution against a provider.
pub struct ToolLoop<'a> {
    pub transport: &'a Transport,
    pub registry: &'a ToolRegistry,
    pub settings: &'a ToolLoopSettings,
    pub bus: &'a DiagnosticBus,
    pub metrics: &'a PipelineMetrics,
    pub request_id: &'a str,
    pub turn_index: u64,
}

impl ToolLoop<'_> {
    /// Drive the loop to a terminal state. Transport/provider failures
    /// propagate for the controller to classify; the round limit yields
    /// `reply: None`, never an empty success.
    pub async fn run(&self, mut plan: RequestPlan) -> Result<LoopRun, ProviderError> {
        let mut messages: Vec<Message> = Vec::new();
        let mut rounds: u32 = 0;

        let mut response = self.transport.send(&plan).await?;

        loop {
            if response.tool_calls.is_empty() {
                return Ok(LoopRun {
                    reply: Some(response.content),
                    rounds,
                    messages,
                });
            }

            rounds += 1;
            debug!(
                request_id = %self.request_id,
                round = rounds,
                max_rounds = self.settings.max_rounds,
                calls = response.tool_calls.len(),
                "Tool round requested by provider"
            );

            // Record the assistant's tool request
            let mut assistant_parts: Vec<ContentPart> = Vec::new();
            if !response.content.trim().is_empty() {
                assistant_parts.push(ContentPart::text(response.content.clone()));
            }
            for call in &response.tool_calls {
                assistant_parts.push(ContentPart::ToolCall {
                    call_id: call.call_id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }
            let assistant_msg =
                Message::new(Role::Assistant, assistant_parts.clone(), self.turn_index);
            messages.push(assistant_msg);
            plan.messages.push(PlanMessage {
                role: Role::Assistant,
                parts: assistant_parts,
            });

            // Execute sequentially in emission order
            for call in &response.tool_calls {
                let result_part = self.execute_call(call, rounds).await;
                let tool_msg = Message::new(Role::Tool, vec![result_part.clone()], self.turn_index);
                messages.push(tool_msg);
                plan.messages.push(PlanMessage {
                    role: Role::Tool,
                    parts: vec![result_part],
                });
            }

            if rounds >= self.settings.max_rounds {
                warn!(
                    request_id = %self.request_id,
                    rounds,
                    "Tool round limit reached with tool calls still pending"
                );
                return Ok(LoopRun {
                    reply: None,
                    rounds,
                    messages,
                });
            }

            response = self.transport.send(&plan).await?;
        }
    }

    /// Resolve one requested call into a length-capped tool result part.
    async fn execute_call(&self, call: &ToolCall, round: u32) -> ContentPart {
        self.metrics.inc_tool_calls();
        let started = Instant::now();
        let resolved = self.registry.resolve_alias(&call.name);
        if resolved != call.name {
            debug!(
                request_id = %self.request_id,
                requested = %call.name,
                resolved = %resolved,
                "Resolved tool name alias"
            );
        }

        let (payload, success, blocked) = if !self.registry.is_allowed(resolved) {
            // Policy event, not an exception: the handler is never
            // invoked and the model gets a fixed result to adapt to.
            warn!(
                request_id = %self.request_id,
                tool = %call.name,
                "Tool call rejected by allowlist"
            );
            self.metrics.inc_tool_blocked();
            (format!("Tool not permitted: {}", call.name), false, true)
        } else {
            match self.registry.get(resolved) {
                None => (
                    ToolError::NotFound(call.name.clone()).to_string(),
                    false,
                    false,
                ),
                Some(handler) => match self.invoke_handler(handler.as_ref(), call).await {
                    Ok(output) => (output, true, false),
                    Err(ToolError::Timeout { tool_name, .. }) => {
                        (format!("Tool timed out: {tool_name}"), false, false)
                    }
                    Err(e) => (format!("Tool execution failed: {e}"), false, false),
                },
            }
        };

        self.bus.publish(DiagnosticEvent::ToolExecuted {
            request_id: self.request_id.to_string(),
            round_index: round,
            tool_name: call.name.clone(),
            success,
            blocked,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        // Capping happens here, before the result is folded back.
        ContentPart::tool_result_capped(
            call.call_id.clone(),
            resolved.to_string(),
            payload,
            self.settings.result_max_chars,
        )
    }

    async fn invoke_handler(
        &self,
        handler: &dyn palaver_core::tool::ToolHandler,
        call: &ToolCall,
    ) -> Result<String, ToolError> {
        if self.settings.tool_timeout.is_zero() {
            return handler.invoke(call.arguments.clone()).await;
        }
        match tokio::time::timeout(self.settings.tool_timeout, handler.invoke(call.arguments.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: handler.name().to_string(),
                timeout_secs: self.settings.tool_timeout.as_secs(),
            }),
        }
    }
}
