//! Orchestrator: one deterministic run per window
//!
//! `run` never returns an error. Every failure mode ends as data in the
//! `PipelineResult`: a delivery status plus dead-letter records.

use crate::baseline::{BaselineDigest, BaselineStore, InMemoryBaselineStore};
use crate::contracts;
use crate::dead_letter::{DeadLetterEmitter, DeadLetterSink, LogDeadLetterSink, RunIdentity};
use crate::delivery::{Authorization, DeliveryAuthorizer};
use crate::machine::StageMachine;
use crate::quality::QualityGate;
use crate::stages::{StageFailure, StageLedger, StageRunner};
use crate::variables::{self, StageOutputs};
use std::collections::HashSet;
use std::sync::Arc;
use tgdigest_context::{BuiltContext, ContextEngine, ContextHistory};
use tgdigest_core::{
    new_trace_id, BaselineDelta, ConversationWindow, DeadLetterRecord, Delivery, DeliveryStatus,
    DigestConfig, DigestResult, ErrorCode, Message, MessageId, PipelineResult, StageName, TraceId,
};
use tgdigest_llm::{assign, BreakerRegistry, ModelCapability, QuotaGate, ResilientModel};
use tokio::time::Instant;
use tracing::Instrument;

/// Mutable state of one run. Never shared across runs.
#[derive(Debug, Default)]
struct RunDraft {
    machine: StageMachine,
    outputs: StageOutputs,
    ledger: StageLedger,
    dlq: Vec<DeadLetterRecord>,
}

/// Gate and delivery outcome of a run.
struct Verdict {
    skip: bool,
    quality_pass: bool,
    baseline_delta: BaselineDelta,
    delivery: Delivery,
}

/// Composes the context engine, stage pipeline, gates and dead-letter trail.
pub struct Orchestrator {
    config: DigestConfig,
    context: ContextEngine,
    model: Arc<ResilientModel>,
    quota: Arc<QuotaGate>,
    quality: QualityGate,
    delivery: DeliveryAuthorizer,
    emitter: DeadLetterEmitter,
    history: Option<Arc<dyn ContextHistory>>,
    baseline: Arc<dyn BaselineStore>,
    sink: Arc<dyn DeadLetterSink>,
}

impl Orchestrator {
    /// Validate `config` and wrap `model` in the resilience layer.
    pub fn new(config: DigestConfig, model: Arc<dyn ModelCapability>) -> DigestResult<Self> {
        config.validate()?;
        let context = ContextEngine::new(config.context.clone())?;
        Ok(Self {
            context,
            model: Arc::new(ResilientModel::from_config(model, &config)),
            quota: Arc::new(QuotaGate::new(config.quota.clone())),
            quality: QualityGate::new(config.quality.threshold),
            delivery: DeliveryAuthorizer::new(&config.delivery),
            emitter: DeadLetterEmitter::new(config.pipeline.event_type.clone()),
            history: None,
            baseline: Arc::new(InMemoryBaselineStore::new()),
            sink: Arc::new(LogDeadLetterSink),
            config,
        })
    }

    pub fn with_history(mut self, history: Arc<dyn ContextHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_baseline_store(mut self, store: Arc<dyn BaselineStore>) -> Self {
        self.baseline = store;
        self
    }

    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &DigestConfig {
        &self.config
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        self.model.breakers()
    }

    pub fn quota(&self) -> &Arc<QuotaGate> {
        &self.quota
    }

    /// Run the pipeline over one window.
    pub async fn run(&self, window: &ConversationWindow, messages: Vec<Message>) -> PipelineResult {
        let trace_id = new_trace_id();
        let span = tracing::info_span!(
            "digest_run",
            trace_id = %trace_id,
            tenant_id = %window.tenant_id,
            window_id = %window.window_id,
            group_id = %window.group_id,
        );
        self.run_traced(trace_id, window, messages)
            .instrument(span)
            .await
    }

    async fn run_traced(
        &self,
        trace_id: TraceId,
        window: &ConversationWindow,
        messages: Vec<Message>,
    ) -> PipelineResult {
        let started = Instant::now();
        let run = RunIdentity {
            tenant_id: window.tenant_id.clone(),
            window_id: window.window_id,
            trace_id,
        };
        let variant = self.config.experiment.as_ref().and_then(|experiment| {
            assign(&window.tenant_id, &experiment.salt, &experiment.variants).map(str::to_string)
        });
        tracing::info!(messages = messages.len(), variant = ?variant, "digest run started");

        let context = self
            .context
            .build_with_history(window, messages, self.history.as_deref())
            .await;
        let payload = payload_snippet(window, &context);
        let mut draft = RunDraft::default();

        let verdict = match self.precheck(window).await {
            Some((code, detail, location)) => {
                draft
                    .dlq
                    .push(self.emitter.run_rejected(&run, code.clone(), detail, location, &payload));
                self.failed_verdict(code.to_string())
            }
            None => {
                self.execute(window, &run, &context, variant.as_deref(), &payload, &mut draft)
                    .await
            }
        };

        let result = self.assemble(window, &run, &context, draft, variant, verdict);
        for record in &result.dlq_events {
            self.sink.append(record);
        }
        tracing::info!(
            status = result.delivery.status.as_str(),
            quality_pass = result.quality_pass,
            dead_letters = result.dlq_events.len(),
            fallbacks = result.fallbacks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "digest run finished"
        );
        result
    }

    /// Zero-cost rejections made before any model call.
    async fn precheck(&self, window: &ConversationWindow) -> Option<(ErrorCode, &'static str, &'static str)> {
        if self.config.quota.hard_limit && self.quota.is_exhausted(&window.tenant_id) {
            tracing::warn!("premium quota exhausted, run cancelled before any model call");
            return Some((
                ErrorCode::QuotaExceeded,
                "premium quota exhausted for tenant",
                "pipeline > quota_gate",
            ));
        }
        if !self.model.is_ready().await {
            tracing::warn!("model capability not ready, run cancelled");
            return Some((
                ErrorCode::ModelUnavailable,
                "model capability reported not ready",
                "pipeline > readiness",
            ));
        }
        None
    }

    async fn execute(
        &self,
        window: &ConversationWindow,
        run: &RunIdentity,
        context: &BuiltContext,
        variant: Option<&str>,
        payload: &str,
        draft: &mut RunDraft,
    ) -> Verdict {
        let runner = StageRunner::new(
            self.model.as_ref(),
            &self.quota,
            &self.config.stages,
            &window.tenant_id,
            run.trace_id,
        );
        let deadline = self.config.pipeline.run_deadline();
        let outcome =
            tokio::time::timeout(deadline, self.run_stages(&runner, context, variant, draft)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => {
                tracing::warn!(stage = %failure.stage, cause = %failure.error.cause(), "stage failed, run stopped");
                draft.dlq.push(self.emitter.stage_failure(run, &failure, payload));
                return self.failed_verdict(failure.error_code().to_string());
            }
            Err(_) => {
                let location = match draft.machine.next_stage() {
                    Some(stage) => format!("pipeline > {}", stage),
                    None => "pipeline".to_string(),
                };
                tracing::warn!(deadline_ms = deadline.as_millis() as u64, location = %location, "run deadline exceeded");
                draft.dlq.push(self.emitter.run_rejected(
                    run,
                    ErrorCode::DeadlineExceeded,
                    &format!("run exceeded its {}ms deadline", deadline.as_millis()),
                    &location,
                    payload,
                ));
                return self.failed_verdict(ErrorCode::DeadlineExceeded.to_string());
            }
        }

        let Some(evaluation) = draft.outputs.evaluation.clone() else {
            draft.dlq.push(self.emitter.run_rejected(
                run,
                ErrorCode::InternalError,
                "evaluation output missing after evaluated state",
                "pipeline > quality_gate",
                payload,
            ));
            return self.failed_verdict(ErrorCode::InternalError.to_string());
        };

        let quality = self.quality.judge(&evaluation);
        if !quality.quality_pass {
            draft.dlq.push(self.emitter.quality_below_threshold(
                run,
                quality.quality_score,
                quality.threshold,
                payload,
            ));
        }
        let baseline_delta = self
            .quality
            .baseline_delta(
                self.baseline.as_ref(),
                &window.tenant_id,
                window.group_id,
                &draft.outputs.topics,
            )
            .await;

        let authorization = self.delivery.authorize(window);
        if let Authorization::MissingScope(scope) = &authorization {
            tracing::warn!(scope = %scope, "delivery scope missing");
            draft.dlq.push(self.emitter.missing_scope(run, scope, payload));
        }
        let delivery = self.delivery.decide(
            &authorization,
            quality.quality_pass,
            quality.quality_score,
            quality.threshold,
        );

        if delivery.status == DeliveryStatus::Pending {
            let digest = BaselineDigest::from_topics(
                window.window_id,
                &draft.outputs.topics,
                quality.quality_score,
            );
            if let Err(err) = self
                .baseline
                .record(&window.tenant_id, window.group_id, digest)
                .await
            {
                tracing::warn!(error = %err, "failed to record baseline digest");
            }
        }

        Verdict {
            skip: false,
            quality_pass: quality.quality_pass,
            baseline_delta,
            delivery,
        }
    }

    async fn run_stages(
        &self,
        runner: &StageRunner<'_>,
        context: &BuiltContext,
        variant: Option<&str>,
        draft: &mut RunDraft,
    ) -> Result<(), StageFailure> {
        let known_ids: HashSet<MessageId> = context.ranked.iter().map(|r| r.id()).collect();
        let min_summary_chars = self.config.pipeline.min_summary_chars;
        let format = self.config.delivery.format.as_str();

        while let Some(stage) = draft.machine.next_stage() {
            let vars = variables::for_stage(stage, context, &draft.outputs, variant, format);
            let ledger = &mut draft.ledger;
            let outputs = &mut draft.outputs;
            match stage {
                StageName::Segmentation => {
                    outputs.threads = runner
                        .run_structured(stage, &vars, ledger, |text| {
                            contracts::segmentation(text, &known_ids)
                        })
                        .await?;
                }
                StageName::Emotion => {
                    outputs.metrics = Some(
                        runner
                            .run_structured(stage, &vars, ledger, contracts::emotion)
                            .await?,
                    );
                }
                StageName::Roles => {
                    outputs.participants = runner
                        .run_structured(stage, &vars, ledger, contracts::roles)
                        .await?;
                }
                StageName::Topics => {
                    outputs.topics = runner
                        .run_structured(stage, &vars, ledger, contracts::topics)
                        .await?;
                }
                StageName::Synthesis => {
                    outputs.summary = Some(
                        runner
                            .run_synthesis(&vars, ledger, |text| {
                                contracts::synthesis(text, min_summary_chars)
                            })
                            .await?,
                    );
                }
                StageName::Evaluation => {
                    outputs.evaluation = Some(
                        runner
                            .run_structured(stage, &vars, ledger, contracts::evaluation)
                            .await?,
                    );
                }
            }
            let state = draft.machine.complete(stage);
            tracing::debug!(stage = %stage, state = ?state, "stage complete");
        }
        Ok(())
    }

    /// Verdict of a run stopped before evaluation. `quality_pass` is false
    /// but no `quality_below_threshold` record is emitted: the failure record
    /// already pushed by the caller is the run's only dead letter.
    fn failed_verdict(&self, reason: String) -> Verdict {
        Verdict {
            skip: true,
            quality_pass: false,
            baseline_delta: BaselineDelta::default(),
            delivery: self.delivery.failed(reason),
        }
    }

    fn assemble(
        &self,
        window: &ConversationWindow,
        run: &RunIdentity,
        context: &BuiltContext,
        mut draft: RunDraft,
        variant: Option<String>,
        verdict: Verdict,
    ) -> PipelineResult {
        let state = draft.machine.finish(verdict.delivery.status);
        PipelineResult {
            trace_id: run.trace_id,
            window_id: window.window_id,
            group_id: window.group_id,
            tenant_id: window.tenant_id.clone(),
            state,
            skip: verdict.skip,
            summary_html: draft.outputs.summary,
            topics: draft.outputs.topics,
            threads: draft.outputs.threads,
            participants: draft.outputs.participants,
            metrics: draft.outputs.metrics,
            evaluation: draft.outputs.evaluation,
            quality_pass: verdict.quality_pass,
            baseline_delta: verdict.baseline_delta,
            delivery: verdict.delivery,
            context_stats: context.stats,
            context_ranking: context.ranking_entries(),
            context_history_links: context.history_links.clone(),
            dlq_events: draft.dlq,
            variant,
            fallbacks: draft.ledger.fallbacks,
            models_used: draft.ledger.models_used,
        }
    }

    /// Result for a run that never completed, e.g. a panicked task.
    pub fn internal_error_result(&self, window: &ConversationWindow, detail: &str) -> PipelineResult {
        let run = RunIdentity {
            tenant_id: window.tenant_id.clone(),
            window_id: window.window_id,
            trace_id: new_trace_id(),
        };
        let mut draft = RunDraft::default();
        let record = self.emitter.run_rejected(
            &run,
            ErrorCode::InternalError,
            detail,
            "pipeline > pool",
            &window.window_id.to_string(),
        );
        self.sink.append(&record);
        draft.dlq.push(record);
        let verdict = self.failed_verdict(ErrorCode::InternalError.to_string());
        self.assemble(window, &run, &BuiltContext::default(), draft, None, verdict)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("model", &self.model)
            .field("quota", &self.quota)
            .field("quality", &self.quality)
            .field("has_history", &self.history.is_some())
            .finish()
    }
}

/// Compact description of the work item for dead-letter payload snippets.
fn payload_snippet(window: &ConversationWindow, context: &BuiltContext) -> String {
    let ranked_ids: Vec<MessageId> = context.ranked.iter().map(|r| r.id()).collect();
    serde_json::json!({
        "window_id": window.window_id,
        "group_id": window.group_id,
        "tenant_id": window.tenant_id,
        "window_start": window.window_start,
        "window_end": window.window_end,
        "message_count": window.message_count,
        "ranked_ids": ranked_ids,
    })
    .to_string()
}
