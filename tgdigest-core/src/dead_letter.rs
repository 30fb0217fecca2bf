//! Dead-letter records
//!
//! A record is append-only data describing why a run failed or why its
//! output was rejected. Nothing in the pipeline mutates a record once built.

use crate::{StageName, TenantId, Timestamp, TraceId, WindowId};
use serde::{Deserialize, Serialize};

/// Maximum characters kept from the error text.
pub const MAX_ERROR_DETAIL_CHARS: usize = 500;

/// Maximum characters kept from the stack context.
pub const MAX_STACK_CONTEXT_CHARS: usize = 1024;

/// Maximum characters kept from the offending payload.
pub const MAX_PAYLOAD_SNIPPET_CHARS: usize = 500;

/// Closed set of dead-letter error codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ErrorCode {
    /// A stage failed terminally, e.g. `synthesis_failed`
    StageFailed(StageName),
    QualityBelowThreshold,
    /// Delivery scope absent, e.g. `missing_scope:digest:deliver`
    MissingScope(String),
    QuotaExceeded,
    ModelUnavailable,
    DeadlineExceeded,
    InternalError,
    // Technical causes surfaced from the resilience layer
    CircuitOpen,
    RetriesExhausted,
    Timeout,
    RateLimited,
    TransportError,
    InvalidResponse,
    ContractViolation,
}

impl ErrorCode {
    /// Quality-related codes drive `quality_pass = false`.
    pub fn is_quality_related(&self) -> bool {
        matches!(self, Self::QualityBelowThreshold)
    }

    /// Map a technical cause code (see `LlmError::cause_code`) to its enum value.
    pub fn from_cause(cause: &str) -> Self {
        match cause {
            "circuit_open" => Self::CircuitOpen,
            "retries_exhausted" => Self::RetriesExhausted,
            "timeout" => Self::Timeout,
            "rate_limited" => Self::RateLimited,
            "invalid_response" => Self::InvalidResponse,
            "contract_violation" => Self::ContractViolation,
            _ => Self::TransportError,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageFailed(stage) => write!(f, "{}_failed", stage.as_str()),
            Self::QualityBelowThreshold => f.write_str("quality_below_threshold"),
            Self::MissingScope(scope) => write!(f, "missing_scope:{}", scope),
            Self::QuotaExceeded => f.write_str("quota_exceeded"),
            Self::ModelUnavailable => f.write_str("model_unavailable"),
            Self::DeadlineExceeded => f.write_str("deadline_exceeded"),
            Self::InternalError => f.write_str("internal_error"),
            Self::CircuitOpen => f.write_str("circuit_open"),
            Self::RetriesExhausted => f.write_str("retries_exhausted"),
            Self::Timeout => f.write_str("timeout"),
            Self::RateLimited => f.write_str("rate_limited"),
            Self::TransportError => f.write_str("transport_error"),
            Self::InvalidResponse => f.write_str("invalid_response"),
            Self::ContractViolation => f.write_str("contract_violation"),
        }
    }
}

/// Error parsing ErrorCode from string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeParseError(pub String);

impl std::fmt::Display for ErrorCodeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid dead-letter error code: {}", self.0)
    }
}

impl std::error::Error for ErrorCodeParseError {}

impl std::str::FromStr for ErrorCode {
    type Err = ErrorCodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(scope) = s.strip_prefix("missing_scope:") {
            return Ok(Self::MissingScope(scope.to_string()));
        }
        if let Some(stage) = s.strip_suffix("_failed") {
            return StageName::from_name(stage)
                .map(Self::StageFailed)
                .map_err(|_| ErrorCodeParseError(s.to_string()));
        }
        match s {
            "quality_below_threshold" => Ok(Self::QualityBelowThreshold),
            "quota_exceeded" => Ok(Self::QuotaExceeded),
            "model_unavailable" => Ok(Self::ModelUnavailable),
            "deadline_exceeded" => Ok(Self::DeadlineExceeded),
            "internal_error" => Ok(Self::InternalError),
            "circuit_open" => Ok(Self::CircuitOpen),
            "retries_exhausted" => Ok(Self::RetriesExhausted),
            "timeout" => Ok(Self::Timeout),
            "rate_limited" => Ok(Self::RateLimited),
            "transport_error" => Ok(Self::TransportError),
            "invalid_response" => Ok(Self::InvalidResponse),
            "contract_violation" => Ok(Self::ContractViolation),
            _ => Err(ErrorCodeParseError(s.to_string())),
        }
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.to_string()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = ErrorCodeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Structured description of a failed or rejected run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Base event type of the work item, e.g. `digest.window`
    pub event_type: String,
    /// Snippet of the offending payload
    pub payload_snippet: String,
    pub error_code: ErrorCode,
    /// Technical cause behind a stage failure, if any
    pub cause: Option<ErrorCode>,
    /// Error text, at most `MAX_ERROR_DETAIL_CHARS` characters
    pub error_detail: String,
    /// Where the failure surfaced, at most `MAX_STACK_CONTEXT_CHARS` characters
    pub stack_context: String,
    pub retry_count: u32,
    pub first_seen_at: Timestamp,
    pub last_seen_at: Timestamp,
    pub tenant_id: TenantId,
    pub window_id: WindowId,
    pub trace_id: TraceId,
}

/// Truncate to at most `max_chars` characters, never splitting a UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
