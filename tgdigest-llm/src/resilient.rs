//! Resilience wrapper around a model capability
//!
//! Every call goes breaker check, then retry policy, then per-attempt timeout.
//! The breaker records exactly one outcome per wrapped call. A call whose
//! future is dropped settles nothing, except that an abandoned half-open
//! probe reopens the circuit.

use crate::breaker::BreakerRegistry;
use crate::capability::{InvokeRequest, ModelCapability};
use crate::retry::{RetryError, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tgdigest_core::{DigestConfig, LlmError, ModelResponse};

/// Model capability guarded by circuit breakers, retries and timeouts.
pub struct ResilientModel {
    inner: Arc<dyn ModelCapability>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy<LlmError>,
    call_timeout: Duration,
}

impl ResilientModel {
    pub fn new(
        inner: Arc<dyn ModelCapability>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy<LlmError>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            breakers,
            retry,
            call_timeout,
        }
    }

    /// Build from the digest config with a fresh breaker registry.
    pub fn from_config(inner: Arc<dyn ModelCapability>, config: &DigestConfig) -> Self {
        Self::new(
            inner,
            Arc::new(BreakerRegistry::new(config.circuit_breaker.clone())),
            RetryPolicy::from_config(&config.retry),
            config.pipeline.call_timeout(),
        )
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    async fn attempt(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError> {
        match tokio::time::timeout(self.call_timeout, self.inner.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                after_ms: self.call_timeout.as_millis() as u64,
            }),
        }
    }
}

fn into_llm_error(err: RetryError<LlmError>) -> LlmError {
    if err.exhausted {
        LlmError::RetriesExhausted {
            attempts: err.attempts,
            last: Box::new(err.error),
        }
    } else {
        err.error
    }
}

#[async_trait]
impl ModelCapability for ResilientModel {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError> {
        let breaker = self.breakers.get(&request.model_alias);
        let permit = breaker.before_call()?;

        let result = self.retry.run(|| self.attempt(request.clone())).await;
        match result {
            Ok(response) => {
                permit.succeeded();
                Ok(response)
            }
            Err(err) => {
                permit.failed();
                let err = into_llm_error(err);
                tracing::warn!(
                    stage = %request.stage,
                    model_alias = %request.model_alias,
                    cause = err.cause_code(),
                    error = %err,
                    "model call failed"
                );
                Err(err)
            }
        }
    }

    async fn is_ready(&self) -> bool {
        self.inner.is_ready().await
    }
}

impl std::fmt::Debug for ResilientModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientModel")
            .field("retry", &self.retry)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
