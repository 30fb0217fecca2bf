//! Retry with exponential backoff
//!
//! Backoff sleeps are tokio timers, so a waiting run never blocks a worker
//! thread and paused-clock tests advance instantly.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tgdigest_core::{LlmError, RetryConfig};

/// Error classification for retry decisions.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait hint, honoured as a lower bound on the backoff.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        LlmError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryError<E> {
    /// The last error seen
    pub error: E,
    /// Attempts made, including the first
    pub attempts: u32,
    /// True when the error was retryable but the attempt budget ran out
    pub exhausted: bool,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.exhausted {
            write!(f, "gave up after {} attempts: {}", self.attempts, self.error)
        } else {
            write!(f, "failed on attempt {}: {}", self.attempts, self.error)
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type WaitHint<E> = Arc<dyn Fn(&E) -> Option<Duration> + Send + Sync>;

/// Retry policy: exponential backoff with optional jitter and an error classifier.
pub struct RetryPolicy<E> {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_attempts: u32,
    jitter: bool,
    classifier: Classifier<E>,
    wait_hint: WaitHint<E>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            initial_interval: self.initial_interval,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_attempts: self.max_attempts,
            jitter: self.jitter,
            classifier: Arc::clone(&self.classifier),
            wait_hint: Arc::clone(&self.wait_hint),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("initial_interval", &self.initial_interval)
            .field("multiplier", &self.multiplier)
            .field("max_interval", &self.max_interval)
            .field("max_attempts", &self.max_attempts)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl<E: Retryable + 'static> RetryPolicy<E> {
    /// Policy that retries whatever the error type classifies as retryable.
    pub fn from_config(config: &RetryConfig) -> Self {
        let mut policy = Self::with_classifier(config, |e: &E| e.is_retryable());
        policy.wait_hint = Arc::new(|e: &E| e.retry_after());
        policy
    }
}

impl<E: 'static> RetryPolicy<E> {
    /// Policy with a custom classifier.
    pub fn with_classifier(
        config: &RetryConfig,
        classifier: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            initial_interval: config.initial_interval(),
            multiplier: config.multiplier.max(1.0),
            max_interval: config.max_interval(),
            max_attempts: config.max_attempts.max(1),
            jitter: config.jitter,
            classifier: Arc::new(classifier),
            wait_hint: Arc::new(|_: &E| None),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff before the retry that follows failed attempt `attempt` (1-based),
    /// without jitter: `min(max_interval, initial * multiplier^(attempt-1))`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let base = self.backoff(attempt);
        let jitter = if self.jitter && !base.is_zero() {
            let max_ms = base.as_millis() as u64;
            Duration::from_millis(rand::rng().random_range(0..=max_ms))
        } else {
            Duration::ZERO
        };
        let delay = base + jitter;
        match hint {
            Some(hint) => delay.max(hint.min(self.max_interval)),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !(self.classifier)(&error) {
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            exhausted: false,
                        });
                    }
                    if attempt >= self.max_attempts {
                        tracing::warn!(attempts = attempt, error = %error, "retry budget exhausted");
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            exhausted: true,
                        });
                    }
                    let delay = self.delay(attempt, (self.wait_hint)(&error));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
