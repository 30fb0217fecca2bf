//! Circuit breaker and per-dependency registry
//!
//! One breaker exists per logical dependency, shared by every run in the
//! process. All state lives behind a single mutex so each call performs one
//! read-modify-write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tgdigest_core::{CircuitBreakerConfig, CircuitState, LlmError};
use tokio::time::Instant;

/// Snapshot of a breaker's mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    /// Consecutive failures since the last success
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
    /// When an open circuit admits its first probe
    pub next_attempt_at: Option<Instant>,
    /// Probes admitted since entering half-open
    pub half_open_calls: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
            half_open_calls: 0,
        }
    }
}

/// Circuit breaker for one dependency.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(CircuitBreakerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        *self.lock()
    }

    /// Ask whether a call may proceed.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// and admits up to `half_open_max_calls` probes. Otherwise an open
    /// circuit rejects with `LlmError::CircuitOpen` without calling anything.
    ///
    /// The returned permit must be settled with `succeeded` or `failed`. A
    /// probe permit dropped unsettled reopens the circuit.
    pub fn before_call(&self) -> Result<CallPermit<'_>, LlmError> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let next = inner.next_attempt_at.unwrap_or(now);
                if now >= next {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_calls = 1;
                    tracing::info!(dependency = %self.dependency, "circuit half-open, admitting probe");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(self.open_error(next.saturating_duration_since(now).as_millis() as u64))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(self.open_error(0))
                }
            }
        }
    }

    fn open_error(&self, retry_in_ms: u64) -> LlmError {
        LlmError::CircuitOpen {
            dependency: self.dependency.clone(),
            retry_in_ms,
        }
    }

    /// Report a completed call that succeeded. Closes the circuit.
    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!(dependency = %self.dependency, from = inner.state.as_str(), "circuit closed");
        }
        *inner = CircuitBreakerState {
            last_failure_at: inner.last_failure_at,
            ..CircuitBreakerState::default()
        };
    }

    /// Report a completed call that failed. Opens the circuit once the
    /// consecutive failure count reaches the threshold; a failed half-open
    /// probe reopens it.
    fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        let should_open = inner.state == CircuitState::HalfOpen
            || (inner.state == CircuitState::Closed
                && inner.failure_count >= self.config.failure_threshold);
        if should_open {
            inner.state = CircuitState::Open;
            inner.half_open_calls = 0;
            inner.next_attempt_at = Some(now + self.config.recovery_timeout());
            tracing::warn!(
                dependency = %self.dependency,
                failures = inner.failure_count,
                recovery_ms = self.config.recovery_timeout_ms,
                "circuit opened"
            );
        }
    }

    /// A probe ended without an outcome (its future was dropped). Reopens
    /// for a full recovery timeout.
    fn record_abandoned_probe(&self) {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.state != CircuitState::HalfOpen {
            return;
        }
        inner.state = CircuitState::Open;
        inner.half_open_calls = 0;
        inner.next_attempt_at = Some(now + self.config.recovery_timeout());
        tracing::warn!(dependency = %self.dependency, "half-open probe abandoned, circuit reopened");
    }
}

/// Admission to one call through a breaker.
#[must_use = "settle the permit with `succeeded` or `failed`"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failed(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.record_abandoned_probe();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .finish()
    }
}

// ============================================================================
// BREAKER REGISTRY
// ============================================================================

/// Process-wide breakers keyed by dependency (model alias).
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `dependency`, created closed on first use.
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            breakers
                .entry(dependency.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone()))),
        )
    }

    /// Current state of every known breaker, sorted by dependency.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut states: Vec<(String, CircuitState)> = breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
