//! Stage invocation: primary, one repair, and the synthesis retry spec
//!
//! A stage call goes through the quota gate (premium alias only) and then the
//! model capability, which in production is the resilience wrapper. Transport
//! retries happen below this layer; this layer only decides between the
//! primary, repair and retry specs.

use serde_json::Value;
use tgdigest_context::estimate_tokens;
use tgdigest_core::{
    ConfigError, ContractError, ErrorCode, LlmError, StageMode, StageName, StageSpec,
    StageSpecTable, TenantId, TraceId,
};
use tgdigest_llm::{InvokeRequest, ModelCapability, QuotaDecision, QuotaGate};
use thiserror::Error;

/// Outcome of one invocation of one stage spec.
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Success(T),
    ContractViolation(ContractError),
    TransportFailure(LlmError),
}

/// Why a stage ended up failed.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Transport(#[from] LlmError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StageError {
    /// Technical cause recorded next to the stage failure code.
    pub fn cause(&self) -> ErrorCode {
        match self {
            Self::Contract(_) => ErrorCode::ContractViolation,
            Self::Transport(e) => ErrorCode::from_cause(e.cause_code()),
            Self::Config(_) => ErrorCode::InternalError,
        }
    }
}

/// Terminal failure of one stage.
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: StageName,
    pub error: StageError,
    /// Underlying model attempts made across every mode of the stage
    pub attempts: u32,
    /// One entry per failed invocation, oldest first
    pub trail: Vec<String>,
    /// Last model output rejected by the contract, if any
    pub last_output: Option<String>,
}

impl StageFailure {
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::StageFailed(self.stage)
    }

    /// Stage path and cause chain, for the dead-letter stack context.
    pub fn stack_context(&self) -> String {
        let mut context = format!("pipeline > {}", self.stage);
        for entry in &self.trail {
            context.push_str(" | ");
            context.push_str(entry);
        }
        context
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed after {} attempts: {}", self.stage, self.attempts, self.error)
    }
}

/// Per-run accounting of stage calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLedger {
    /// Model identities that served calls, in call order
    pub models_used: Vec<String>,
    /// Premium-to-base downgrades
    pub fallbacks: u32,
    /// Repair invocations triggered by contract violations
    pub repairs: u32,
}

struct Tracker {
    stage: StageName,
    attempts: u32,
    trail: Vec<String>,
    last_output: Option<String>,
}

impl Tracker {
    fn new(stage: StageName) -> Self {
        Self {
            stage,
            attempts: 0,
            trail: Vec::new(),
            last_output: None,
        }
    }

    fn note(&mut self, mode: StageMode, err: &dyn std::fmt::Display) {
        self.trail.push(format!("{}: {}", mode.as_str(), err));
    }

    fn fail(&mut self, error: StageError) -> StageFailure {
        StageFailure {
            stage: self.stage,
            error,
            attempts: self.attempts,
            trail: std::mem::take(&mut self.trail),
            last_output: self.last_output.take(),
        }
    }
}

/// Runs stages of one pipeline run against a model capability.
pub struct StageRunner<'a> {
    model: &'a dyn ModelCapability,
    quota: &'a QuotaGate,
    specs: &'a StageSpecTable,
    tenant_id: &'a TenantId,
    trace_id: TraceId,
}

impl<'a> StageRunner<'a> {
    pub fn new(
        model: &'a dyn ModelCapability,
        quota: &'a QuotaGate,
        specs: &'a StageSpecTable,
        tenant_id: &'a TenantId,
        trace_id: TraceId,
    ) -> Self {
        Self {
            model,
            quota,
            specs,
            tenant_id,
            trace_id,
        }
    }

    fn spec(
        &self,
        stage: StageName,
        mode: StageMode,
        tracker: &mut Tracker,
    ) -> Result<&'a StageSpec, StageFailure> {
        self.specs
            .get(stage, mode)
            .map_err(|e| tracker.fail(e.into()))
    }

    async fn attempt<T, V>(
        &self,
        spec: &StageSpec,
        variables: &Value,
        ledger: &mut StageLedger,
        tracker: &mut Tracker,
        validate: &V,
    ) -> StageOutcome<T>
    where
        V: Fn(&str) -> Result<T, ContractError> + Sync,
    {
        let estimated_tokens =
            estimate_tokens(&variables.to_string()) + u64::from(spec.max_output_tokens);
        let resolution = self
            .quota
            .resolve(self.tenant_id, &spec.model_alias, estimated_tokens);
        if let Some(decision) = resolution.decision {
            tracing::debug!(
                stage = %spec.stage,
                mode = spec.mode.as_str(),
                tier = decision.tier().as_str(),
                alias = %resolution.alias,
                "premium quota checked"
            );
            if decision == QuotaDecision::Fallback {
                ledger.fallbacks += 1;
            }
        }

        let request = InvokeRequest::from_spec(
            spec,
            variables.clone(),
            self.tenant_id.clone(),
            self.trace_id,
            estimated_tokens,
        )
        .with_model_alias(resolution.alias);

        match self.model.invoke(request).await {
            Ok(response) => {
                tracker.attempts += 1;
                ledger.models_used.push(response.model.clone());
                match validate(&response.text) {
                    Ok(payload) => StageOutcome::Success(payload),
                    Err(violation) => {
                        tracker.note(spec.mode, &violation);
                        tracker.last_output = Some(response.text);
                        StageOutcome::ContractViolation(violation)
                    }
                }
            }
            Err(err) => {
                tracker.attempts += err.attempts();
                tracker.note(spec.mode, &err);
                StageOutcome::TransportFailure(err)
            }
        }
    }

    /// Primary spec, then exactly one repair on a contract violation.
    ///
    /// Transport failures surviving the resilience layer end the stage
    /// without a repair.
    pub async fn run_structured<T, V>(
        &self,
        stage: StageName,
        variables: &Value,
        ledger: &mut StageLedger,
        validate: V,
    ) -> Result<T, StageFailure>
    where
        V: Fn(&str) -> Result<T, ContractError> + Sync,
    {
        let mut tracker = Tracker::new(stage);
        let primary = self.spec(stage, StageMode::Primary, &mut tracker)?;
        match self
            .attempt(primary, variables, ledger, &mut tracker, &validate)
            .await
        {
            StageOutcome::Success(payload) => return Ok(payload),
            StageOutcome::TransportFailure(err) => return Err(tracker.fail(err.into())),
            StageOutcome::ContractViolation(violation) => {
                ledger.repairs += 1;
                tracing::warn!(stage = %stage, error = %violation, "contract violation, invoking repair spec");
            }
        }

        let repair = self.spec(stage, StageMode::Repair, &mut tracker)?;
        match self
            .attempt(repair, variables, ledger, &mut tracker, &validate)
            .await
        {
            StageOutcome::Success(payload) => Ok(payload),
            StageOutcome::ContractViolation(violation) => Err(tracker.fail(violation.into())),
            StageOutcome::TransportFailure(err) => Err(tracker.fail(err.into())),
        }
    }

    /// Synthesis flow: primary, repair on a contract violation, then the
    /// retry spec for any failure still standing.
    pub async fn run_synthesis<T, V>(
        &self,
        variables: &Value,
        ledger: &mut StageLedger,
        validate: V,
    ) -> Result<T, StageFailure>
    where
        V: Fn(&str) -> Result<T, ContractError> + Sync,
    {
        let stage = StageName::Synthesis;
        let mut tracker = Tracker::new(stage);

        let primary = self.spec(stage, StageMode::Primary, &mut tracker)?;
        match self
            .attempt(primary, variables, ledger, &mut tracker, &validate)
            .await
        {
            StageOutcome::Success(payload) => return Ok(payload),
            StageOutcome::ContractViolation(violation) => {
                ledger.repairs += 1;
                tracing::warn!(stage = %stage, error = %violation, "contract violation, invoking repair spec");
                let repair = self.spec(stage, StageMode::Repair, &mut tracker)?;
                if let StageOutcome::Success(payload) = self
                    .attempt(repair, variables, ledger, &mut tracker, &validate)
                    .await
                {
                    return Ok(payload);
                }
            }
            StageOutcome::TransportFailure(err) => {
                tracing::warn!(stage = %stage, cause = err.cause_code(), "primary synthesis failed");
            }
        }

        let retry = self.spec(stage, StageMode::Retry, &mut tracker)?;
        tracing::info!(stage = %stage, model_alias = %retry.model_alias, "invoking synthesis retry spec");
        match self
            .attempt(retry, variables, ledger, &mut tracker, &validate)
            .await
        {
            StageOutcome::Success(payload) => Ok(payload),
            StageOutcome::ContractViolation(violation) => Err(tracker.fail(violation.into())),
            StageOutcome::TransportFailure(err) => Err(tracker.fail(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts;
    use tgdigest_core::{QuotaConfig, StageSpecTable};
    use tgdigest_test_utils::fixtures;
    use tgdigest_test_utils::ScriptedModel;
    use tgdigest_core::new_trace_id;

    fn quota(limit: u32) -> QuotaGate {
        QuotaGate::new(QuotaConfig {
            quota_limit: limit,
            ..QuotaConfig::default()
        })
    }

    fn specs() -> StageSpecTable {
        StageSpecTable::default()
    }

    fn bad_request() -> LlmError {
        LlmError::RequestFailed {
            provider: "scripted".to_string(),
            status: 400,
            message: "rejected".to_string(),
        }
    }

    #[tokio::test]
    async fn test_repair_after_contract_violation() {
        let model = ScriptedModel::well_formed();
        model.enqueue(StageName::Emotion, StageMode::Primary, Ok("{\"tone\": \"furious\"}".to_string()));
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let metrics = runner
            .run_structured(StageName::Emotion, &serde_json::json!({}), &mut ledger, contracts::emotion)
            .await
            .unwrap();

        assert_eq!(metrics.tone, tgdigest_core::Tone::Positive);
        assert_eq!(ledger.repairs, 1);
        assert_eq!(ledger.models_used.len(), 2);
        let modes: Vec<StageMode> = model.calls().iter().map(|c| c.mode).collect();
        assert_eq!(modes, vec![StageMode::Primary, StageMode::Repair]);
    }

    #[tokio::test]
    async fn test_second_violation_fails_stage() {
        let model = ScriptedModel::well_formed().with_response(StageName::Topics, "{\"topics\": 3}");
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let failure = runner
            .run_structured(StageName::Topics, &serde_json::json!({}), &mut ledger, contracts::topics)
            .await
            .unwrap_err();

        assert_eq!(failure.error_code(), ErrorCode::StageFailed(StageName::Topics));
        assert_eq!(failure.error.cause(), ErrorCode::ContractViolation);
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.trail.len(), 2);
        assert_eq!(failure.last_output.as_deref(), Some("{\"topics\": 3}"));
        assert!(failure.stack_context().starts_with("pipeline > topics | primary:"));
    }

    #[tokio::test]
    async fn test_transport_failure_skips_repair() {
        let model = ScriptedModel::well_formed().with_failure(StageName::Roles, bad_request());
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let failure = runner
            .run_structured(StageName::Roles, &serde_json::json!({}), &mut ledger, contracts::roles)
            .await
            .unwrap_err();

        assert_eq!(failure.error.cause(), ErrorCode::TransportError);
        assert_eq!(model.calls().len(), 1);
        assert_eq!(ledger.repairs, 0);
    }

    #[tokio::test]
    async fn test_synthesis_retry_spec_rescues_transport_failure() {
        let model = ScriptedModel::well_formed();
        model.enqueue(StageName::Synthesis, StageMode::Primary, Err(bad_request()));
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let summary = runner
            .run_synthesis(&serde_json::json!({}), &mut ledger, |text| contracts::synthesis(text, 10))
            .await
            .unwrap();

        assert!(summary.contains("release"));
        let modes: Vec<StageMode> = model.calls().iter().map(|c| c.mode).collect();
        assert_eq!(modes, vec![StageMode::Primary, StageMode::Retry]);
    }

    #[tokio::test]
    async fn test_synthesis_fails_after_primary_and_retry() {
        let model = ScriptedModel::well_formed().with_failure(StageName::Synthesis, bad_request());
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let failure = runner
            .run_synthesis(&serde_json::json!({}), &mut ledger, |text| contracts::synthesis(text, 10))
            .await
            .unwrap_err();

        assert_eq!(failure.error_code().to_string(), "synthesis_failed");
        assert_eq!(failure.attempts, 2);
        assert!(ledger.models_used.is_empty());
    }

    #[tokio::test]
    async fn test_low_information_synthesis_repaired_then_retried() {
        let model = ScriptedModel::well_formed();
        model.enqueue(StageName::Synthesis, StageMode::Primary, Ok("{\"summary\": \"ok\"}".to_string()));
        model.enqueue(StageName::Synthesis, StageMode::Repair, Ok("{\"summary\": \"fine\"}".to_string()));
        let (quota, specs, tenant) = (quota(10), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        let summary = runner
            .run_synthesis(&serde_json::json!({}), &mut ledger, |text| contracts::synthesis(text, 10))
            .await
            .unwrap();

        assert_eq!(summary, fixtures::SYNTHESIS_SUMMARY);
        assert_eq!(model.calls().len(), 3);
        assert_eq!(ledger.repairs, 1);
    }

    #[tokio::test]
    async fn test_quota_fallback_routes_premium_stage_to_base() {
        let model = ScriptedModel::well_formed();
        let (quota, specs, tenant) = (quota(0), specs(), TenantId::new("acme"));
        let runner = StageRunner::new(&model, &quota, &specs, &tenant, new_trace_id());
        let mut ledger = StageLedger::default();

        runner
            .run_structured(StageName::Evaluation, &serde_json::json!({}), &mut ledger, contracts::evaluation)
            .await
            .unwrap();
        runner
            .run_structured(StageName::Emotion, &serde_json::json!({}), &mut ledger, contracts::emotion)
            .await
            .unwrap();

        let aliases: Vec<String> = model.calls().iter().map(|c| c.model_alias.clone()).collect();
        assert_eq!(aliases, vec!["digest-base".to_string(), "digest-base".to_string()]);
        assert_eq!(ledger.fallbacks, 1);
        assert_eq!(quota.total_fallbacks(), 1);
    }
}
