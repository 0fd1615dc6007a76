//! Provider transport with an explicit timeout boundary and local
//! replay of transport failures.
//!
//! A timed-out or connection-dropped request is replayed identically up
//! to the configured budget with a fixed delay. Transport retries never
//! consult or mutate the degradation level — that escalation belongs to
//! the controller.

use palaver_core::error::ProviderError;
use palaver_core::provider::{Provider, ProviderResponse, RequestPlan};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::PipelineMetrics;

/// Wraps a provider with timeout enforcement and transport-level retry.
pub struct Transport {
    provider: Arc<dyn Provider>,
    request_timeout: Duration,
    timeout_retries: u32,
    retry_delay: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl Transport {
    pub fn new(
        provider: Arc<dyn Provider>,
        request_timeout: Duration,
        timeout_retries: u32,
        retry_delay: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            provider,
            request_timeout,
            timeout_retries,
            retry_delay,
            metrics,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Send a plan, replaying the identical request on transport
    /// failures (timeout, network) up to the retry budget.
    pub async fn send(&self, plan: &RequestPlan) -> Result<ProviderResponse, ProviderError> {
        let mut last_error = ProviderError::Timeout("no attempt made".into());

        for attempt in 0..=self.timeout_retries {
            if attempt > 0 {
                self.metrics.inc_transport_retries();
                tokio::time::sleep(self.retry_delay).await;
            }

            debug!(
                provider = %self.provider.name(),
                attempt = attempt + 1,
                total = self.timeout_retries + 1,
                "Transport: sending request"
            );

            match tokio::time::timeout(self.request_timeout, self.provider.send(plan.clone()))
                .await
            {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if is_transport_failure(&e) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt = attempt + 1,
                        error = %e,
                        "Transport: provider call failed, will replay"
                    );
                    last_error = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        provider = %self.provider.name(),
                        attempt = attempt + 1,
                        timeout_secs = self.request_timeout.as_secs(),
                        "Transport: provider call timed out, will replay"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "provider '{}' timed out after {}s",
                        self.provider.name(),
                        self.request_timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

/// Transport-class failures are replayed; everything else surfaces
/// immediately.
pub fn is_transport_failure(error: &ProviderError) -> bool {
    matches!(
        error,
        ProviderError::Timeout(_) | ProviderError::Network(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use palaver_core::capability::ProviderKind;
    use palaver_core::message::Role;
    use palaver_core::provider::PlanMessage;
    use std::sync::Mutex;

    fn plan() -> RequestPlan {
        RequestPlan {
            model: "test".into(),
            messages: vec![PlanMessage::text(Role::User, "hello")],
            tools: vec![],
            response_format: Default::default(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Fails with the given errors in order, then succeeds.
    struct ScriptedProvider {
        errors: Mutex<Vec<ProviderError>>,
        calls: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(errors: Vec<ProviderError>) -> Self {
            Self {
                errors: Mutex::new(errors),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAiCompat
        }
        async fn send(&self, _plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let mut errors = self.errors.lock().unwrap();
            if errors.is_empty() {
                Ok(ProviderResponse {
                    content: "ok".into(),
                    tool_calls: vec![],
                    usage: None,
                    model: "test".into(),
                })
            } else {
                Err(errors.remove(0))
            }
        }
    }

    /// Hangs forever (for timeout testing).
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }
        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenAiCompat
        }
        async fn send(&self, _plan: RequestPlan) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    fn transport(provider: Arc<dyn Provider>, retries: u32) -> Transport {
        Transport::new(
            provider,
            Duration::from_millis(50),
            retries,
            Duration::from_millis(1),
            Arc::new(PipelineMetrics::default()),
        )
    }

    #[tokio::test]
    async fn timeout_is_replayed_then_succeeds() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderError::Timeout(
            "slow".into(),
        )]));
        let t = transport(provider.clone(), 1);
        let response = t.send(&plan()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderError::Timeout("1".into()),
            ProviderError::Timeout("2".into()),
            ProviderError::Timeout("3".into()),
        ]));
        let t = transport(provider.clone(), 1);
        let err = t.send(&plan()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        // 1 initial + 1 retry, never more
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn non_transport_errors_surface_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ProviderError::AuthenticationFailed("bad key".into()),
        ]));
        let t = transport(provider.clone(), 3);
        let err = t.send(&plan()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn hanging_call_hits_the_deadline() {
        let t = transport(Arc::new(HangingProvider), 0);
        let err = t.send(&plan()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn zero_retries_means_single_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![ProviderError::Network(
            "conn reset".into(),
        )]));
        let t = transport(provider.clone(), 0);
        assert!(t.send(&plan()).await.is_err());
        assert_eq!(provider.calls(), 1);
    }
}
