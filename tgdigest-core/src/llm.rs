//! Model-call primitive types.
//!
//! Pure data types. Traits and resilience logic live in tgdigest-llm.

use serde::{Deserialize, Serialize};

/// Breaker state of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow and failures are counted
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// A bounded number of probes decide between closing and reopening
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which model tier served a premium-routed stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Premium,
    Base,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::Base => "base",
        }
    }
}
