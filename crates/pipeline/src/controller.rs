//! The retry & degradation controller.
//!
//! Wraps one logical user request end-to-end. Failures are classified
//! and recovered as close to their origin as policy allows: transport
//! timeouts are replayed at the transport layer, empty replies are
//! replayed locally and then escalate the degradation ladder, and only
//! terminal classes surface — always as one stable, non-leaking user
//! message backed by a structured diagnostic.

use chrono::Utc;
use palaver_config::RetryConfig;
use palaver_core::error::{PipelineError, ProviderError};
use palaver_core::event::{DiagnosticBus, DiagnosticEvent};
use palaver_core::message::SessionKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::metrics::PipelineMetrics;
use crate::transport::is_transport_failure;

/// How one attempt failed, from the controller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transport budget exhausted (timeout / network)
    TransportTimeout,

    /// Success status with empty content
    EmptyResponse,

    /// The context store could not serve the request
    ContextUnavailable,

    /// Tool round limit exceeded without a final text
    ToolLoopExhausted,

    /// The provider rejected the request outright (auth, rate limit,
    /// capability mismatch, malformed response)
    ProviderRejected,

    /// The originating event was cancelled
    Cancelled,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportTimeout => "transport_timeout",
            Self::EmptyResponse => "empty_response",
            Self::ContextUnavailable => "context_unavailable",
            Self::ToolLoopExhausted => "tool_loop_exhausted",
            Self::ProviderRejected => "provider_rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a provider error that escaped the transport layer.
    pub fn from_provider_error(error: &ProviderError) -> Self {
        if is_transport_failure(error) {
            Self::TransportTimeout
        } else {
            Self::ProviderRejected
        }
    }
}

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub reply: String,
    pub fingerprint: String,
}

/// A failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub class: FailureClass,
    pub fingerprint: Option<String>,
    pub detail: String,
}

impl AttemptFailure {
    pub fn new(class: FailureClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            fingerprint: None,
            detail: detail.into(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }
}

/// What the controller hands back on success.
#[derive(Debug, Clone)]
pub struct ControllerSuccess {
    pub reply: String,
    pub degrade_level: u8,
    pub attempts: u32,
    pub fingerprint: String,
}

/// The structured record behind a terminal failure. This — never a
/// stack trace — is what observability receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalDiagnostic {
    pub session_key: String,
    pub request_id: String,
    pub classification: String,
    pub degrade_level: u8,
    pub attempts: u32,
    pub fingerprint: String,
}

/// A terminal failure: one stable generic message for the user, a
/// structured diagnostic for everyone else.
#[derive(Debug, Clone)]
pub struct TerminalError {
    pub user_message: String,
    pub diagnostic: TerminalDiagnostic,
}

impl std::fmt::Display for TerminalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message)
    }
}

impl std::error::Error for TerminalError {}

/// Drives attempts through local retries and the degradation ladder.
pub struct RetryController {
    empty_reply_local_retries: u32,
    empty_reply_retry_delay: Duration,
    degradation_enabled: bool,
    max_degrade_level: u8,
    generic_failure: String,
    bus: Arc<DiagnosticBus>,
    metrics: Arc<PipelineMetrics>,
}

impl RetryController {
    pub fn new(
        retry: &RetryConfig,
        max_degrade_level: u8,
        generic_failure: String,
        bus: Arc<DiagnosticBus>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            empty_reply_local_retries: retry.empty_reply_local_retries,
            empty_reply_retry_delay: retry.empty_reply_retry_delay(),
            degradation_enabled: retry.degradation_enabled,
            max_degrade_level: if retry.degradation_enabled {
                max_degrade_level
            } else {
                0
            },
            generic_failure,
            bus,
            metrics,
        }
    }

    /// Run one logical request. `attempt(level, attempt_no)` executes
    /// the pipeline from the context-read step at the given degradation
    /// level. The level starts at 0 for every new request and never
    /// decreases within one run.
    pub async fn run<F, Fut>(
        &self,
        session_key: &SessionKey,
        request_id: &str,
        mut attempt: F,
    ) -> Result<ControllerSuccess, TerminalError>
    where
        F: FnMut(u8, u32) -> Fut,
        Fut: Future<Output = Result<AttemptReport, AttemptFailure>>,
    {
        let mut attempts: u32 = 0;
        let mut last_fingerprint = String::new();

        for level in 0..=self.max_degrade_level {
            if level > 0 {
                self.metrics.inc_degradations();
                self.bus.publish(DiagnosticEvent::DegradationEscalated {
                    session_key: session_key.to_string(),
                    request_id: request_id.to_string(),
                    from_level: level - 1,
                    to_level: level,
                    timestamp: Utc::now(),
                });
                warn!(
                    session_key = %session_key,
                    request_id,
                    level,
                    "Escalating degradation level"
                );
                tokio::time::sleep(self.empty_reply_retry_delay).await;
            }

            let mut local_retries: u32 = 0;
            loop {
                attempts += 1;
                let started = Instant::now();
                let result = attempt(level, attempts).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                let classification = match &result {
                    Ok(_) => "ok",
                    Err(f) => f.class.as_str(),
                };
                self.bus.publish(DiagnosticEvent::AttemptFinished {
                    session_key: session_key.to_string(),
                    request_id: request_id.to_string(),
                    attempt: attempts,
                    degrade_level: level,
                    classification: classification.to_string(),
                    latency_ms,
                    timestamp: Utc::now(),
                });
                info!(
                    session_key = %session_key,
                    request_id,
                    attempt = attempts,
                    degrade_level = level,
                    classification,
                    latency_ms,
                    "Pipeline attempt finished"
                );

                match result {
                    Ok(report) => {
                        return Ok(ControllerSuccess {
                            reply: report.reply,
                            degrade_level: level,
                            attempts,
                            fingerprint: report.fingerprint,
                        });
                    }
                    Err(failure) => {
                        if let Some(fp) = &failure.fingerprint {
                            last_fingerprint = fp.clone();
                        }
                        match failure.class {
                            FailureClass::EmptyResponse => {
                                self.metrics.inc_empty_replies();
                                if local_retries < self.empty_reply_local_retries {
                                    local_retries += 1;
                                    warn!(
                                        request_id,
                                        local_retries,
                                        "Empty reply, replaying identical request"
                                    );
                                    tokio::time::sleep(self.empty_reply_retry_delay).await;
                                    continue;
                                }
                                // Local budget spent — escalate the ladder
                                break;
                            }
                            _ => {
                                return Err(self.terminal(
                                    session_key,
                                    request_id,
                                    failure,
                                    level,
                                    attempts,
                                    &last_fingerprint,
                                ));
                            }
                        }
                    }
                }
            }
        }

        // Every level returned empty
        let (classification, detail) = if self.degradation_enabled {
            (
                "degradation_exhausted",
                PipelineError::DegradationExhausted {
                    level: self.max_degrade_level,
                    attempts,
                }
                .to_string(),
            )
        } else {
            ("empty_response", PipelineError::EmptyResponse.to_string())
        };
        Err(self.terminal_raw(
            session_key,
            request_id,
            classification,
            &detail,
            self.max_degrade_level,
            attempts,
            &last_fingerprint,
        ))
    }

    fn terminal(
        &self,
        session_key: &SessionKey,
        request_id: &str,
        failure: AttemptFailure,
        level: u8,
        attempts: u32,
        last_fingerprint: &str,
    ) -> TerminalError {
        let fingerprint = failure
            .fingerprint
            .unwrap_or_else(|| last_fingerprint.to_string());
        self.terminal_raw(
            session_key,
            request_id,
            failure.class.as_str(),
            &failure.detail,
            level,
            attempts,
            &fingerprint,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn terminal_raw(
        &self,
        session_key: &SessionKey,
        request_id: &str,
        classification: &str,
        detail: &str,
        level: u8,
        attempts: u32,
        fingerprint: &str,
    ) -> TerminalError {
        self.metrics.inc_terminal_failures();
        let diagnostic = TerminalDiagnostic {
            session_key: session_key.to_string(),
            request_id: request_id.to_string(),
            classification: classification.to_string(),
            degrade_level: level,
            attempts,
            fingerprint: fingerprint.to_string(),
        };
        self.bus.publish(DiagnosticEvent::TerminalFailure {
            session_key: diagnostic.session_key.clone(),
            request_id: diagnostic.request_id.clone(),
            classification: diagnostic.classification.clone(),
            degrade_level: level,
            attempts,
            fingerprint: diagnostic.fingerprint.clone(),
            timestamp: Utc::now(),
        });
        error!(
            session_key = %session_key,
            request_id,
            classification,
            degrade_level = level,
            attempts,
            fingerprint,
            detail,
            "Request failed terminally"
        );
        TerminalError {
            user_message: self.generic_failure.clone(),
            diagnostic,
        }
    }
}
