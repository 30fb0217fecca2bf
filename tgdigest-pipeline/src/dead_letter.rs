//! Dead-letter emitter and sinks
//!
//! The emitter is pure data assembly and cannot fail. Sinks are append-only.

use crate::stages::StageFailure;
use chrono::Utc;
use std::sync::Mutex;
use tgdigest_core::{
    truncate_chars, DeadLetterRecord, ErrorCode, TenantId, TraceId, WindowId,
    MAX_ERROR_DETAIL_CHARS, MAX_PAYLOAD_SNIPPET_CHARS, MAX_STACK_CONTEXT_CHARS,
};

/// Identity of the run a record belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub tenant_id: TenantId,
    pub window_id: WindowId,
    pub trace_id: TraceId,
}

/// Builds dead-letter records for one event type.
#[derive(Debug, Clone)]
pub struct DeadLetterEmitter {
    event_type: String,
}

impl DeadLetterEmitter {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &self,
        run: &RunIdentity,
        error_code: ErrorCode,
        cause: Option<ErrorCode>,
        error_detail: &str,
        stack_context: &str,
        payload: &str,
        retry_count: u32,
    ) -> DeadLetterRecord {
        let now = Utc::now();
        tracing::warn!(
            trace_id = %run.trace_id,
            tenant_id = %run.tenant_id,
            window_id = %run.window_id,
            error_code = %error_code,
            retry_count,
            "dead letter emitted"
        );
        DeadLetterRecord {
            event_type: self.event_type.clone(),
            payload_snippet: truncate_chars(payload, MAX_PAYLOAD_SNIPPET_CHARS),
            error_code,
            cause,
            error_detail: truncate_chars(error_detail, MAX_ERROR_DETAIL_CHARS),
            stack_context: truncate_chars(stack_context, MAX_STACK_CONTEXT_CHARS),
            retry_count,
            first_seen_at: now,
            last_seen_at: now,
            tenant_id: run.tenant_id.clone(),
            window_id: run.window_id,
            trace_id: run.trace_id,
        }
    }

    /// `<stage>_failed`, with the technical cause and the attempt count.
    pub fn stage_failure(&self, run: &RunIdentity, failure: &StageFailure, payload: &str) -> DeadLetterRecord {
        let payload = failure.last_output.as_deref().unwrap_or(payload);
        self.emit(
            run,
            failure.error_code(),
            Some(failure.error.cause()),
            &failure.to_string(),
            &failure.stack_context(),
            payload,
            failure.attempts,
        )
    }

    pub fn quality_below_threshold(
        &self,
        run: &RunIdentity,
        quality_score: f64,
        threshold: f64,
        payload: &str,
    ) -> DeadLetterRecord {
        self.emit(
            run,
            ErrorCode::QualityBelowThreshold,
            None,
            &format!("quality score {:.2} below threshold {:.2}", quality_score, threshold),
            "pipeline > quality_gate",
            payload,
            0,
        )
    }

    pub fn missing_scope(&self, run: &RunIdentity, scope: &str, payload: &str) -> DeadLetterRecord {
        self.emit(
            run,
            ErrorCode::MissingScope(scope.to_string()),
            None,
            &format!("caller lacks required scope {}", scope),
            "pipeline > delivery_authorizer",
            payload,
            0,
        )
    }

    /// A run rejected before any stage call (quota, readiness, deadline, panic).
    pub fn run_rejected(
        &self,
        run: &RunIdentity,
        error_code: ErrorCode,
        detail: &str,
        location: &str,
        payload: &str,
    ) -> DeadLetterRecord {
        self.emit(run, error_code, None, detail, location, payload, 0)
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Append-only destination for dead-letter records.
pub trait DeadLetterSink: Send + Sync {
    fn append(&self, record: &DeadLetterRecord);
}

/// Sink writing each record to the log as a structured event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeadLetterSink;

impl DeadLetterSink for LogDeadLetterSink {
    fn append(&self, record: &DeadLetterRecord) {
        tracing::error!(
            event_type = %record.event_type,
            error_code = %record.error_code,
            cause = ?record.cause.as_ref().map(ToString::to_string),
            tenant_id = %record.tenant_id,
            window_id = %record.window_id,
            trace_id = %record.trace_id,
            retry_count = record.retry_count,
            detail = %record.error_detail,
            "dead letter"
        );
    }
}

/// Sink keeping records in memory.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    records: Mutex<Vec<DeadLetterRecord>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn append(&self, record: &DeadLetterRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageError;
    use tgdigest_core::{LlmError, StageName};

    fn run() -> RunIdentity {
        RunIdentity {
            tenant_id: TenantId::new("acme"),
            window_id: WindowId::now_v7(),
            trace_id: tgdigest_core::new_trace_id(),
        }
    }

    #[test]
    fn test_emit_truncates_long_fields() {
        let emitter = DeadLetterEmitter::new("digest.window");
        let long = "é".repeat(2_000);
        let record = emitter.emit(&run(), ErrorCode::InternalError, None, &long, &long, &long, 0);
        assert_eq!(record.error_detail.chars().count(), MAX_ERROR_DETAIL_CHARS);
        assert_eq!(record.stack_context.chars().count(), MAX_STACK_CONTEXT_CHARS);
        assert_eq!(record.payload_snippet.chars().count(), MAX_PAYLOAD_SNIPPET_CHARS);
        assert_eq!(record.first_seen_at, record.last_seen_at);
        assert_eq!(record.event_type, "digest.window");
    }

    #[test]
    fn test_stage_failure_record() {
        let emitter = DeadLetterEmitter::new("digest.window");
        let failure = StageFailure {
            stage: StageName::Synthesis,
            error: StageError::Transport(LlmError::RetriesExhausted {
                attempts: 3,
                last: Box::new(LlmError::Timeout { after_ms: 100 }),
            }),
            attempts: 6,
            trail: vec!["primary: boom".to_string(), "retry: boom".to_string()],
            last_output: None,
        };
        let record = emitter.stage_failure(&run(), &failure, "{\"window\": 1}");
        assert_eq!(record.error_code.to_string(), "synthesis_failed");
        assert_eq!(record.cause, Some(ErrorCode::RetriesExhausted));
        assert_eq!(record.retry_count, 6);
        assert_eq!(record.payload_snippet, "{\"window\": 1}");
        assert_eq!(record.stack_context, "pipeline > synthesis | primary: boom | retry: boom");
    }

    #[test]
    fn test_missing_scope_code_names_scope() {
        let emitter = DeadLetterEmitter::new("digest.window");
        let record = emitter.missing_scope(&run(), "digest:deliver", "");
        assert_eq!(record.error_code.to_string(), "missing_scope:digest:deliver");
    }

    #[test]
    fn test_in_memory_sink_appends() {
        let sink = InMemoryDeadLetterSink::new();
        assert!(sink.is_empty());
        let emitter = DeadLetterEmitter::new("digest.window");
        sink.append(&emitter.quality_below_threshold(&run(), 0.5, 0.6, ""));
        sink.append(&emitter.missing_scope(&run(), "x", ""));
        let codes: Vec<String> = sink.records().iter().map(|r| r.error_code.to_string()).collect();
        assert_eq!(codes, vec!["quality_below_threshold", "missing_scope:x"]);
    }
}
