//! End-to-end digest runs against a scripted model
//!
//! Every test drives a full run through the orchestrator: context build,
//! six stages, quality gate, delivery authorizer and dead-letter trail.

use std::sync::Arc;
use tgdigest_core::{
    DeliveryStatus, ErrorCode, ExperimentConfig, PipelineState, RoleName, StageMode, StageName,
};
use tgdigest_llm::assign;
use tgdigest_pipeline::{InMemoryDeadLetterSink, Orchestrator};
use tgdigest_test_utils::assertions::*;
use tgdigest_test_utils::{fixtures, LlmError, ScriptedModel};

fn orchestrator(model: &Arc<ScriptedModel>) -> (Orchestrator, Arc<InMemoryDeadLetterSink>) {
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let orchestrator = Orchestrator::new(fixtures::digest_config(), model.clone())
        .expect("valid config")
        .with_dead_letter_sink(sink.clone());
    (orchestrator, sink)
}

fn unavailable() -> LlmError {
    LlmError::RequestFailed {
        provider: "scripted".to_string(),
        status: 503,
        message: "upstream unavailable".to_string(),
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_well_formed_run_is_pending_delivery() {
    let model = Arc::new(ScriptedModel::well_formed());
    let (orchestrator, sink) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    assert!(!result.skip);
    assert!(result.quality_pass);
    assert_eq!(result.delivery.status, DeliveryStatus::Pending);
    assert_eq!(result.state, PipelineState::Delivered);
    assert_eq!(result.delivery.format, "html");
    assert_eq!(result.topics.len(), 1);
    assert_eq!(result.participants.len(), 1);
    assert_eq!(result.participants[0].dominant_role, RoleName::Initiator);
    assert_eq!(result.threads.len(), 1);
    assert_eq!(result.threads[0].message_ids, vec![1, 2]);
    assert_eq!(result.summary_html.as_deref(), Some(fixtures::SYNTHESIS_SUMMARY));
    assert_eq!(result.evaluation.as_ref().map(|e| e.quality_score), Some(0.78));
    assert!(result.dlq_events.is_empty());
    assert!(sink.is_empty());

    assert_eq!(result.window_id, window.window_id);
    assert_eq!(result.tenant_id, window.tenant_id);
    assert_eq!(result.context_stats.ranked_messages, 2);
    assert_eq!(result.context_ranking.len(), 2);
    assert_eq!(result.fallbacks, 0);
    assert_eq!(result.models_used.len(), StageName::ALL.len());

    let stages: Vec<StageName> = model.calls().iter().map(|c| c.stage).collect();
    assert_eq!(stages, StageName::ALL.to_vec());

    assert_quality_invariant(&result);
    assert_skip_matches_status(&result);
}

#[tokio::test(start_paused = true)]
async fn test_low_quality_run_is_blocked_with_one_dead_letter() {
    let model = Arc::new(
        ScriptedModel::well_formed()
            .with_response(StageName::Evaluation, fixtures::evaluation_json(0.51)),
    );
    let (orchestrator, sink) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    assert!(!result.skip);
    assert!(!result.quality_pass);
    assert_eq!(result.delivery.status, DeliveryStatus::BlockedQuality);
    assert_eq!(result.state, PipelineState::BlockedQuality);
    assert_eq!(result.dlq_events.len(), 1);
    let record = assert_single_dead_letter(&result, &ErrorCode::QualityBelowThreshold);
    assert_eq!(record.tenant_id, window.tenant_id);
    assert_eq!(record.window_id, window.window_id);
    assert_eq!(record.trace_id, result.trace_id);
    assert_eq!(sink.len(), 1);

    // The digest itself is still reported.
    assert!(result.summary_html.is_some());
    assert_eq!(result.topics.len(), 1);

    assert_quality_invariant(&result);
    assert_skip_matches_status(&result);
}

#[tokio::test(start_paused = true)]
async fn test_synthesis_failing_twice_skips_the_run() {
    let model = Arc::new(ScriptedModel::well_formed().with_failure(StageName::Synthesis, unavailable()));
    let (orchestrator, sink) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    assert!(result.skip);
    assert!(!result.quality_pass);
    assert_eq!(result.delivery.status, DeliveryStatus::BlockedFailure);
    assert_eq!(result.state, PipelineState::BlockedFailure);
    assert_eq!(result.dlq_events.len(), 1);
    let record = assert_single_dead_letter(&result, &ErrorCode::StageFailed(StageName::Synthesis));
    assert_eq!(record.error_code.to_string(), "synthesis_failed");
    assert_eq!(record.cause, Some(ErrorCode::RetriesExhausted));
    // Two transport attempts for the primary spec, two for the retry spec.
    assert_eq!(record.retry_count, 4);
    assert_eq!(model.calls_for(StageName::Synthesis), 4);
    assert!(record.stack_context.starts_with("pipeline > synthesis"));
    assert_eq!(sink.len(), 1);

    assert!(result.summary_html.is_none());
    assert!(result.evaluation.is_none());
    assert_eq!(model.calls_for(StageName::Evaluation), 0);
    assert_skip_matches_status(&result);
}

// ============================================================================
// RBAC
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_scope_blocks_delivery_after_evaluation() {
    let model = Arc::new(ScriptedModel::well_formed());
    let (orchestrator, _) = orchestrator(&model);
    let window = fixtures::window("acme", &["digest:read"]);
    let messages = fixtures::scenario_messages(&window);

    let result = orchestrator.run(&window, messages).await;

    assert!(!result.skip);
    assert!(result.quality_pass);
    assert_eq!(result.delivery.status, DeliveryStatus::BlockedRbac);
    assert_eq!(result.state, PipelineState::BlockedRbac);
    assert!(result.evaluation.is_some());
    assert_single_dead_letter(&result, &ErrorCode::MissingScope(fixtures::DELIVER_SCOPE.to_string()));
    assert_eq!(result.dlq_events.len(), 1);
    assert_quality_invariant(&result);
}

#[tokio::test(start_paused = true)]
async fn test_missing_scope_wins_over_low_quality() {
    let model = Arc::new(
        ScriptedModel::well_formed()
            .with_response(StageName::Evaluation, fixtures::evaluation_json(0.3)),
    );
    let (orchestrator, _) = orchestrator(&model);
    let window = fixtures::window("acme", &[]);
    let messages = fixtures::scenario_messages(&window);

    let result = orchestrator.run(&window, messages).await;

    assert_eq!(result.delivery.status, DeliveryStatus::BlockedRbac);
    assert!(!result.quality_pass);
    assert_eq!(result.dlq_events.len(), 2);
    assert_single_dead_letter(&result, &ErrorCode::QualityBelowThreshold);
    assert_quality_invariant(&result);
}

// ============================================================================
// CONTRACTS AND REPAIR
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_contract_violation_is_repaired_once() {
    let model = Arc::new(ScriptedModel::well_formed());
    model.enqueue(StageName::Topics, StageMode::Primary, Ok("no json here".to_string()));
    let (orchestrator, _) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    assert_eq!(result.delivery.status, DeliveryStatus::Pending);
    assert_eq!(model.calls_for(StageName::Topics), 2);
    let topic_modes: Vec<StageMode> = model
        .calls()
        .iter()
        .filter(|c| c.stage == StageName::Topics)
        .map(|c| c.mode)
        .collect();
    assert_eq!(topic_modes, vec![StageMode::Primary, StageMode::Repair]);
    assert!(result.dlq_events.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unrepairable_output_fails_the_stage() {
    let bad = "{\"tone\": \"furious\"}";
    let model = Arc::new(ScriptedModel::well_formed().with_response(StageName::Emotion, bad));
    let (orchestrator, _) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    assert!(result.skip);
    assert_eq!(result.delivery.status, DeliveryStatus::BlockedFailure);
    let record = assert_single_dead_letter(&result, &ErrorCode::StageFailed(StageName::Emotion));
    assert_eq!(record.cause, Some(ErrorCode::ContractViolation));
    assert_eq!(record.retry_count, 2);
    assert_eq!(record.payload_snippet, bad);
    assert_eq!(model.calls_for(StageName::Emotion), 2);
    assert_eq!(model.calls_for(StageName::Roles), 0);
    assert_eq!(result.threads.len(), 1);
    assert!(result.metrics.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_transport_failure_skips_repair() {
    let model = Arc::new(ScriptedModel::well_formed().with_failure(
        StageName::Segmentation,
        LlmError::RequestFailed {
            provider: "scripted".to_string(),
            status: 400,
            message: "bad request".to_string(),
        },
    ));
    let (orchestrator, _) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    let record = assert_single_dead_letter(&result, &ErrorCode::StageFailed(StageName::Segmentation));
    assert_eq!(record.cause, Some(ErrorCode::TransportError));
    assert_eq!(record.retry_count, 1);
    assert_eq!(model.calls().len(), 1);
}

// ============================================================================
// BASELINE AND EXPERIMENTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_run_compares_against_previous_digest() {
    let model = Arc::new(ScriptedModel::well_formed());
    let (orchestrator, _) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let first = orchestrator.run(&window, messages.clone()).await;
    assert!(!first.baseline_delta.has_baseline);
    assert_eq!(first.baseline_delta.novel_topics, 0);

    model.enqueue(
        StageName::Topics,
        StageMode::Primary,
        Ok(fixtures::topics_json_with(&["friday release", "Hiring plan"])),
    );
    let second = orchestrator.run(&window, messages).await;
    assert!(second.baseline_delta.has_baseline);
    assert_eq!(second.baseline_delta.novel_topics, 1);
    assert_ne!(first.trace_id, second.trace_id);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_digest_is_not_recorded_as_baseline() {
    let model = Arc::new(ScriptedModel::well_formed());
    model.enqueue(
        StageName::Evaluation,
        StageMode::Primary,
        Ok(fixtures::evaluation_json(0.2)),
    );
    let (orchestrator, _) = orchestrator(&model);
    let (window, messages) = fixtures::scenario();

    let blocked = orchestrator.run(&window, messages.clone()).await;
    assert_eq!(blocked.delivery.status, DeliveryStatus::BlockedQuality);

    let next = orchestrator.run(&window, messages).await;
    assert_eq!(next.delivery.status, DeliveryStatus::Pending);
    assert!(!next.baseline_delta.has_baseline);
}

#[tokio::test(start_paused = true)]
async fn test_experiment_variant_reaches_every_stage() {
    let variants = vec!["control".to_string(), "concise".to_string()];
    let mut config = fixtures::digest_config();
    config.experiment = Some(ExperimentConfig {
        salt: "digest-style-2026".to_string(),
        variants: variants.clone(),
    });
    let model = Arc::new(ScriptedModel::well_formed());
    let orchestrator = Orchestrator::new(config, model.clone()).expect("valid config");
    let (window, messages) = fixtures::scenario();

    let result = orchestrator.run(&window, messages).await;

    let expected = assign(&window.tenant_id, "digest-style-2026", &variants).map(str::to_string);
    assert!(expected.is_some());
    assert_eq!(result.variant, expected);
    for call in model.calls() {
        assert_eq!(call.variables["variant"].as_str(), expected.as_deref());
    }
}
