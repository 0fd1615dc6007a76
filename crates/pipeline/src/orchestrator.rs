//! The pipeline orchestrator — the single entry point for one incoming
//! chat event.
//!
//! Sequence: acquire the per-session lock → append the user message
//! (idempotent) → run the controller's attempt loop (context read →
//! sanitize → build → tool loop) → append the reply → release. If the
//! originating event is cancelled, in-flight calls complete but their
//! results are discarded rather than appended; the lock is released
//! either way.

use chrono::Utc;
use palaver_config::PalaverConfig;
use palaver_core::capability::{self, ProviderCapabilities, ProviderKind};
use palaver_core::collab::{Captioner, Summarizer};
use palaver_core::error::{ContextError, PipelineError};
use palaver_core::event::{DiagnosticBus, DiagnosticEvent};
use palaver_core::message::{ContentPart, Message, Role, SessionKey};
use palaver_core::provider::Provider;
use palaver_core::tool::ToolRegistry;
use palaver_context::working::build_working_context;
use palaver_context::{ArchiveFilter, ArchiveStore, ContextBudget, SessionLockManager};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::builder::{self, BuildInputs};
use crate::controller::{
    AttemptFailure, AttemptReport, FailureClass, RetryController, TerminalError,
};
use crate::degrade::DegradeLadder;
use crate::metrics::PipelineMetrics;
use crate::sanitize::{SanitizeOptions, sanitize};
use crate::tool_loop::{ToolLoop, ToolLoopSettings};
use crate::transport::Transport;

/// An image carried by an incoming event.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub reference: String,
    pub mime: String,
}

/// A platform-neutral incoming chat event, as decoded by the adapter.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform message id — appends are idempotent on this
    pub message_id: String,

    /// The text of the message
    pub text: String,

    /// Attached images
    pub images: Vec<ImageAttachment>,

    /// The caller wants structured JSON output
    pub structured_output: bool,

    /// Cancelled when the originating connection drops
    pub cancellation: CancellationToken,
}

impl IncomingMessage {
    pub fn text_only(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            text: text.into(),
            images: Vec::new(),
            structured_output: false,
            cancellation: CancellationToken::new(),
        }
    }
}

/// The reply handed back to the adapter for delivery.
#[derive(Debug, Clone)]
pub struct OutgoingReply {
    pub text: String,
    pub request_id: String,
    pub degrade_level: u8,
}

/// The assembled pipeline. One instance serves all sessions; events for
/// different sessions run concurrently, events for the same session are
/// serialized by the lock map.
pub struct ChatPipeline {
    config: PalaverConfig,
    archive: Arc<dyn ArchiveStore>,
    registry: Arc<ToolRegistry>,
    summarizer: Option<Arc<dyn Summarizer>>,
    captioner: Option<Arc<dyn Captioner>>,
    provider_kind: ProviderKind,
    transport: Transport,
    ladder: DegradeLadder,
    controller: RetryController,
    locks: SessionLockManager,
    bus: Arc<DiagnosticBus>,
    metrics: Arc<PipelineMetrics>,
}

impl ChatPipeline {
    pub fn new(
        config: PalaverConfig,
        archive: Arc<dyn ArchiveStore>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let bus = Arc::new(DiagnosticBus::default());
        let metrics = Arc::new(PipelineMetrics::default());
        let ladder = DegradeLadder::from_config(&config.retry);
        let controller = RetryController::new(
            &config.retry,
            ladder.max_level(),
            config.messages.generic_failure.clone(),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        );
        let transport = Transport::new(
            provider.clone(),
            config.provider.request_timeout(),
            config.retry.transport_timeout_retries,
            config.retry.transport_retry_delay(),
            Arc::clone(&metrics),
        );
        let locks = SessionLockManager::new(config.session.max_locks, config.session.lock_ttl());
        let provider_kind = provider.kind();

        Self {
            config,
            archive,
            registry,
            summarizer: None,
            captioner: None,
            provider_kind,
            transport,
            ladder,
            controller,
            locks,
            bus,
            metrics,
        }
    }

    /// Attach a summarizer collaborator.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Attach a captioner collaborator.
    pub fn with_captioner(mut self, captioner: Arc<dyn Captioner>) -> Self {
        self.captioner = Some(captioner);
        self
    }

    pub fn bus(&self) -> &Arc<DiagnosticBus> {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Read-only archive access for history-search style tools and
    /// adapter features.
    pub async fn query_archive(
        &self,
        session_key: &SessionKey,
        filter: &ArchiveFilter,
    ) -> Result<Vec<Message>, ContextError> {
        self.archive.query(session_key, filter).await
    }

    /// Store reads and writes share the transport retry budget: a flaky
    /// archive gets the same local replay treatment as a flaky provider
    /// before the failure surfaces.
    async fn with_store_retry<T, F, Fut>(&self, mut op: F) -> Result<T, ContextError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ContextError>>,
    {
        let retries = self.config.retry.transport_timeout_retries;
        let mut last: Option<ContextError> = None;
        for attempt in 0..=retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry.transport_retry_delay()).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        total = retries + 1,
                        error = %e,
                        "Context store operation failed"
                    );
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| ContextError::Unavailable("no attempt made".into())))
    }

    /// Handle one incoming event end-to-end.
    pub async fn handle(
        &self,
        event: IncomingMessage,
        session_key: SessionKey,
    ) -> Result<OutgoingReply, TerminalError> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        self.metrics.inc_requests();
        self.bus.publish(DiagnosticEvent::RequestStarted {
            session_key: session_key.to_string(),
            request_id: request_id.clone(),
            timestamp: Utc::now(),
        });
        info!(
            session_key = %session_key,
            request_id = %request_id,
            "Handling incoming event"
        );

        // Serialize per-session mutation; the guard is held across the
        // whole request, including every error path below.
        let lock = self.locks.get_lock(&session_key.to_string());
        let _guard = lock.lock().await;

        let result = self
            .handle_locked(&event, &session_key, &request_id)
            .await;

        match &result {
            Ok(reply) => {
                self.metrics.inc_replies();
                self.bus.publish(DiagnosticEvent::ReplyDelivered {
                    session_key: session_key.to_string(),
                    request_id: request_id.clone(),
                    degrade_level: reply.degrade_level,
                    latency_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                debug!(
                    request_id = %request_id,
                    classification = %e.diagnostic.classification,
                    "Event finished with terminal failure"
                );
            }
        }
        result
    }

    async fn handle_locked(
        &self,
        event: &IncomingMessage,
        session_key: &SessionKey,
        request_id: &str,
    ) -> Result<OutgoingReply, TerminalError> {
        let capabilities = capability::resolve(
            self.provider_kind,
            &self.config.provider.model,
            &self.config.provider.capabilities,
        );

        let turn_index = match self
            .with_store_retry(|| self.archive.last_turn_index(session_key))
            .await
        {
            Ok(last) => last + 1,
            Err(e) => {
                return Err(self.context_terminal(session_key, request_id, &e));
            }
        };

        let user_msg = self.build_user_message(event, turn_index);
        if let Err(e) = self
            .with_store_retry(|| self.archive.append(session_key, user_msg.clone()))
            .await
        {
            return Err(self.context_terminal(session_key, request_id, &e));
        }

        let outcome = self
            .controller
            .run(session_key, request_id, |level, _attempt| {
                self.attempt(level, &capabilities, &user_msg, event, session_key, request_id)
            })
            .await?;

        // Cancellation discards the result instead of appending it; the
        // lock still releases through the guard above.
        if event.cancellation.is_cancelled() {
            info!(request_id, "Event cancelled, discarding generated reply");
            return Err(TerminalError {
                user_message: self.config.messages.generic_failure.clone(),
                diagnostic: crate::controller::TerminalDiagnostic {
                    session_key: session_key.to_string(),
                    request_id: request_id.to_string(),
                    classification: FailureClass::Cancelled.as_str().to_string(),
                    degrade_level: outcome.degrade_level,
                    attempts: outcome.attempts,
                    fingerprint: outcome.fingerprint,
                },
            });
        }

        let reply_msg = Message::new(
            Role::Assistant,
            vec![ContentPart::text(outcome.reply.clone())],
            turn_index,
        );
        if let Err(e) = self.archive.append(session_key, reply_msg).await {
            // The reply exists; losing the archive write is logged loudly
            // rather than failing the delivery.
            error!(request_id, error = %e, "Failed to archive assistant reply");
        }

        Ok(OutgoingReply {
            text: outcome.reply,
            request_id: request_id.to_string(),
            degrade_level: outcome.degrade_level,
        })
    }

    /// One pipeline attempt at a given degradation level: context read,
    /// degrade, sanitize, build, tool loop.
    async fn attempt(
        &self,
        level: u8,
        capabilities: &ProviderCapabilities,
        user_msg: &Message,
        event: &IncomingMessage,
        session_key: &SessionKey,
        request_id: &str,
    ) -> Result<AttemptReport, AttemptFailure> {
        if event.cancellation.is_cancelled() {
            return Err(AttemptFailure::new(FailureClass::Cancelled, "cancelled"));
        }

        let archived = self
            .with_store_retry(|| self.archive.load(session_key))
            .await
            .map_err(|e| AttemptFailure::new(FailureClass::ContextUnavailable, e.to_string()))?;

        // The current user message goes out as the current turn, not as
        // history.
        let history: Vec<Message> = archived
            .into_iter()
            .filter(|m| m.id != user_msg.id)
            .collect();

        let budget = ContextBudget {
            max_turns: self.config.context.max_turns,
            max_tokens_soft: self.config.context.max_tokens_soft,
            summarize: self.config.context.summarize,
        };
        let working = build_working_context(
            &history,
            &budget,
            self.summarizer.as_deref(),
            self.config.context.summarize_timeout(),
        )
        .await;
        if working.turns_dropped > 0 {
            self.bus.publish(DiagnosticEvent::ContextTrimmed {
                session_key: session_key.to_string(),
                turns_dropped: working.turns_dropped,
                token_estimate: working.soft_token_estimate,
                timestamp: Utc::now(),
            });
        }
        if level == 0 {
            // Derived state only; a failed write must not fail the attempt.
            if let Err(e) = self
                .archive
                .record_boundary(
                    session_key,
                    working.boundary_turn(),
                    working.soft_token_estimate,
                )
                .await
            {
                warn!(request_id, error = %e, "Failed to record context boundary");
            }
        }

        let working = self.ladder.apply(level, working);

        let options = SanitizeOptions {
            structured_output: event.structured_output,
            caption_timeout: self.config.context.caption_timeout(),
        };
        let sanitized = sanitize(
            &working,
            capabilities,
            user_msg,
            self.captioner.as_deref(),
            &options,
        )
        .await;

        let tool_schema = self.registry.definitions();
        let plan = builder::build(&BuildInputs {
            sanitized: &sanitized,
            system_instructions: &self.config.system_prompt,
            tool_schema: &tool_schema,
            model: &self.config.provider.model,
            temperature: self.config.provider.temperature,
            max_tokens: self.config.provider.max_tokens,
        });
        let fingerprint = plan.fingerprint();

        let settings = ToolLoopSettings {
            max_rounds: self.config.tools.max_rounds,
            tool_timeout: self.config.tools.timeout(),
            result_max_chars: self.config.tools.result_max_chars,
        };
        let tool_loop = ToolLoop {
            transport: &self.transport,
            registry: &self.registry,
            settings: &settings,
            bus: &self.bus,
            metrics: &self.metrics,
            request_id,
            turn_index: user_msg.turn_index,
        };

        let run = tool_loop.run(plan).await.map_err(|e| {
            AttemptFailure::new(FailureClass::from_provider_error(&e), e.to_string())
                .with_fingerprint(fingerprint.clone())
        })?;

        // Tool rounds stay auditable regardless of the attempt's fate —
        // unless the event was cancelled, in which case nothing is
        // appended.
        if event.cancellation.is_cancelled() {
            return Err(
                AttemptFailure::new(FailureClass::Cancelled, "cancelled during tool loop")
                    .with_fingerprint(fingerprint),
            );
        }
        for message in &run.messages {
            self.with_store_retry(|| self.archive.append(session_key, message.clone()))
                .await
                .map_err(|e| {
                    AttemptFailure::new(FailureClass::ContextUnavailable, e.to_string())
                        .with_fingerprint(fingerprint.clone())
                })?;
        }

        let Some(reply) = run.reply else {
            let err = PipelineError::ToolLoopExhausted { rounds: run.rounds };
            return Err(
                AttemptFailure::new(FailureClass::ToolLoopExhausted, err.to_string())
                    .with_fingerprint(fingerprint),
            );
        };

        let reply = if sanitized.json_fallback {
            builder::parse_delimited(&reply).to_string()
        } else {
            reply
        };

        if reply.trim().is_empty() {
            return Err(AttemptFailure::new(
                FailureClass::EmptyResponse,
                PipelineError::EmptyResponse.to_string(),
            )
            .with_fingerprint(fingerprint));
        }

        Ok(AttemptReport { reply, fingerprint })
    }

    fn build_user_message(&self, event: &IncomingMessage, turn_index: u64) -> Message {
        let mut parts: Vec<ContentPart> = Vec::new();
        if !event.text.is_empty() {
            parts.push(ContentPart::text(event.text.clone()));
        }
        for image in &event.images {
            parts.push(ContentPart::image(image.reference.clone(), image.mime.clone()));
        }
        if parts.is_empty() {
            parts.push(ContentPart::text(""));
        }
        Message::new(Role::User, parts, turn_index).with_id(event.message_id.clone())
    }

    fn context_terminal(
        &self,
        session_key: &SessionKey,
        request_id: &str,
        error: &ContextError,
    ) -> TerminalError {
        self.metrics.inc_terminal_failures();
        error!(
            session_key = %session_key,
            request_id,
            error = %error,
            "Context store unavailable"
        );
        let diagnostic = crate::controller::TerminalDiagnostic {
            session_key: session_key.to_string(),
            request_id: request_id.to_string(),
            classification: FailureClass::ContextUnavailable.as_str().to_string(),
            degrade_level: 0,
            attempts: 0,
            fingerprint: String::new(),
        };
        self.bus.publish(DiagnosticEvent::TerminalFailure {
            session_key: diagnostic.session_key.clone(),
            request_id: diagnostic.request_id.clone(),
            classification: diagnostic.classification.clone(),
            degrade_level: 0,
            attempts: 0,
            fingerprint: String::new(),
            timestamp: Utc::now(),
        });
        TerminalError {
            user_message: self.config.messages.generic_failure.clone(),
            diagnostic,
        }
    }
}
