//! tgdigest LLM - Model Capability and Resilience
//!
//! The pipeline talks to the model service only through [`ModelCapability`].
//! This crate provides that trait, the resilience layer that wraps it
//! (retry policy, circuit breakers, per-call timeout), the per-tenant quota
//! gate, deterministic experiment assignment and an HTTP client.

pub mod breaker;
pub mod capability;
pub mod experiment;
pub mod providers;
pub mod quota;
pub mod resilient;
pub mod retry;

pub use breaker::{BreakerRegistry, CallPermit, CircuitBreaker, CircuitBreakerState};
pub use capability::{InvokeRequest, ModelCapability};
pub use experiment::{assign, bucket};
pub use providers::{HttpModelClient, HttpModelConfig};
pub use quota::{AliasResolution, QuotaDecision, QuotaGate, QuotaState};
pub use resilient::ResilientModel;
pub use retry::{RetryError, RetryPolicy, Retryable};
