//! Error types for digest operations

use crate::StageName;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No stage spec for {stage} ({mode})")]
    MissingStageSpec { stage: StageName, mode: String },
}

/// Model capability and resilience errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        /// HTTP status, 0 when the request never reached the server
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Model call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Circuit open for {dependency}, next probe in {retry_in_ms}ms")]
    CircuitOpen { dependency: String, retry_in_ms: u64 },

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// Whether a transport-level retry may succeed.
    ///
    /// Timeouts, rate limits, connection failures, 408 and 5xx are transient.
    /// Other 4xx, malformed provider envelopes and an open circuit are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::RequestFailed { status, .. } => {
                *status == 0 || *status == 408 || *status == 429 || *status >= 500
            }
            Self::InvalidResponse { .. }
            | Self::CircuitOpen { .. }
            | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Short technical cause code surfaced in dead-letter records.
    pub fn cause_code(&self) -> &'static str {
        match self {
            Self::RequestFailed { .. } => "transport_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Number of underlying attempts this error represents.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            Self::CircuitOpen { .. } => 0,
            _ => 1,
        }
    }
}

/// Output-contract violations raised while validating a stage response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("{stage}: response is not valid JSON: {reason}")]
    Parse { stage: StageName, reason: String },

    #[error("{stage}: required field missing: {field}")]
    MissingField { stage: StageName, field: String },

    #[error("{stage}: invalid value for {field}: {reason}")]
    InvalidValue {
        stage: StageName,
        field: String,
        reason: String,
    },

    #[error("{stage}: unknown value {value:?} for {field}")]
    UnknownVariant {
        stage: StageName,
        field: String,
        value: String,
    },

    #[error("{stage}: output too short ({chars} chars, need {min})")]
    LowInformation {
        stage: StageName,
        chars: usize,
        min: usize,
    },
}

impl ContractError {
    pub fn stage(&self) -> StageName {
        match self {
            Self::Parse { stage, .. }
            | Self::MissingField { stage, .. }
            | Self::InvalidValue { stage, .. }
            | Self::UnknownVariant { stage, .. }
            | Self::LowInformation { stage, .. } => *stage,
        }
    }
}

/// Context-history collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("History store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("History query failed in {namespace}: {reason}")]
    QueryFailed { namespace: String, reason: String },
}

/// Baseline digest store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BaselineError {
    #[error("Baseline store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Baseline store lock poisoned")]
    LockPoisoned,
}

/// Master error type for all digest errors.
#[derive(Debug, Clone, Error)]
pub enum DigestError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),
}

/// Result type alias for digest operations.
pub type DigestResult<T> = Result<T, DigestError>;

// =============================================================================
// TESTS
// =============================================================================
