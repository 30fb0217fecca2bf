//! Concrete model capability clients

pub mod http;

pub use http::{HttpModelClient, HttpModelConfig};

use tgdigest_core::LlmError;

/// Helper to build a request-failed error.
pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> LlmError {
    LlmError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

/// Helper to build a rate-limited error.
pub(crate) fn rate_limited(provider: &str, retry_after_ms: u64) -> LlmError {
    LlmError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    }
}

/// Helper to build an invalid-response error.
pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
