//! Configuration types
//!
//! Every numeric default here is a tunable starting point, not a production
//! constant. Durations are stored as integer milliseconds or seconds so the
//! structs read naturally from TOML.

use crate::{ConfigError, DigestResult, StageMode, StageName, StageSpec};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// CONTEXT ENGINE
// ============================================================================

/// Independent weights of the ranking components. They need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RankingWeights {
    pub recency: f64,
    pub reply: f64,
    pub length: f64,
    pub reactions: f64,
    pub media: f64,
    /// Affinity to recalled prior-window history
    pub history: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency: 0.35,
            reply: 0.2,
            length: 0.2,
            reactions: 0.15,
            media: 0.1,
            history: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Similarity above which two messages are duplicates only when close in time
    pub soft_similarity: f64,
    /// Similarity above which two messages are always duplicates
    pub hard_similarity: f64,
    /// Time gap inside which the soft threshold applies
    pub dedup_time_gap_secs: u64,
    pub recency_half_life_secs: u64,
    /// Character count at which the length component reaches ~63% of its weight
    pub length_saturation_chars: u32,
    /// Maximum messages in the ranked context
    pub top_n: usize,
    /// Maximum documents requested from the history collaborator
    pub history_limit: usize,
    pub weights: RankingWeights,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            soft_similarity: 0.8,
            hard_similarity: 0.95,
            dedup_time_gap_secs: 30 * 60,
            recency_half_life_secs: 6 * 3600,
            length_saturation_chars: 280,
            top_n: 120,
            history_limit: 5,
            weights: RankingWeights::default(),
        }
    }
}

impl ContextConfig {
    /// Check thresholds, cap and ranking weights.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("context.soft_similarity", self.soft_similarity)?;
        check_unit("context.hard_similarity", self.hard_similarity)?;
        if self.soft_similarity > self.hard_similarity {
            return Err(invalid(
                "context.soft_similarity",
                self.soft_similarity,
                "soft threshold must not exceed hard threshold",
            ));
        }
        if self.top_n == 0 {
            return Err(invalid("context.top_n", self.top_n, "must be greater than 0"));
        }
        if self.recency_half_life_secs == 0 {
            return Err(invalid(
                "context.recency_half_life_secs",
                self.recency_half_life_secs,
                "must be positive",
            ));
        }
        if self.length_saturation_chars == 0 {
            return Err(invalid(
                "context.length_saturation_chars",
                self.length_saturation_chars,
                "must be positive",
            ));
        }
        let w = &self.weights;
        for (field, value) in [
            ("context.weights.recency", w.recency),
            ("context.weights.reply", w.reply),
            ("context.weights.length", w.length),
            ("context.weights.reactions", w.reactions),
            ("context.weights.media", w.media),
            ("context.weights.history", w.history),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, value, "must be a non-negative number"));
            }
        }
        Ok(())
    }
}

// ============================================================================
// RESILIENCE
// ============================================================================

/// Retry configuration for model calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Add uniform random jitter up to the computed interval
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}

/// Configuration for circuit breakers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    pub recovery_timeout_ms: u64,
    /// Probe calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

// ============================================================================
// QUOTA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    pub premium_alias: String,
    pub base_alias: String,
    /// Premium calls per tenant per window
    pub quota_limit: u32,
    /// Premium token estimate per tenant per window
    pub token_budget: u64,
    pub window_secs: u64,
    /// Reject runs of exhausted tenants instead of downgrading them
    pub hard_limit: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            premium_alias: "digest-premium".to_string(),
            base_alias: "digest-base".to_string(),
            quota_limit: 50,
            token_budget: 400_000,
            window_secs: 24 * 3600,
            hard_limit: false,
        }
    }
}

impl QuotaConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

// ============================================================================
// GATES, DELIVERY, PIPELINE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualityConfig {
    pub threshold: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { threshold: 0.6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeliveryConfig {
    /// The single scope a caller must hold for output to leave the pipeline
    pub required_scope: String,
    pub format: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            required_scope: "digest:deliver".to_string(),
            format: "html".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Timeout of one underlying model call (each retry attempt)
    pub call_timeout_ms: u64,
    /// Deadline of a whole run
    pub run_deadline_ms: u64,
    /// Concurrent runs admitted by the pool
    pub max_concurrent_runs: usize,
    /// Synthesis output shorter than this is treated as low information value
    pub min_summary_chars: usize,
    /// Event type stamped on dead-letter records
    pub event_type: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 60_000,
            run_deadline_ms: 10 * 60_000,
            max_concurrent_runs: 4,
            min_summary_chars: 40,
            event_type: "digest.window".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_millis(self.run_deadline_ms)
    }
}

/// Deterministic tenant-to-variant experiment assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    pub salt: String,
    pub variants: Vec<String>,
}

// ============================================================================
// STAGE SPECS
// ============================================================================

/// Immutable table of stage specs, one per stage per mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageSpecTable {
    specs: Vec<StageSpec>,
}

impl StageSpecTable {
    pub fn new(specs: Vec<StageSpec>) -> Self {
        Self { specs }
    }

    /// Built-in table: structured stages on the base model, synthesis and
    /// evaluation on the premium model, repairs at zero temperature.
    pub fn defaults(premium_alias: &str, base_alias: &str) -> Self {
        let spec = |stage: StageName, mode: StageMode, alias: &str, temperature: f32, tokens: u32| {
            StageSpec {
                stage,
                mode,
                model_alias: alias.to_string(),
                prompt_alias: format!("digest.{}.{}", stage.as_str(), mode.as_str()),
                temperature,
                max_output_tokens: tokens,
            }
        };

        let mut specs = Vec::new();
        for (stage, alias, temperature, tokens) in [
            (StageName::Segmentation, base_alias, 0.2, 1200),
            (StageName::Emotion, base_alias, 0.2, 400),
            (StageName::Roles, base_alias, 0.3, 1200),
            (StageName::Topics, base_alias, 0.3, 1500),
            (StageName::Synthesis, premium_alias, 0.5, 1800),
            (StageName::Evaluation, premium_alias, 0.0, 600),
        ] {
            specs.push(spec(stage, StageMode::Primary, alias, temperature, tokens));
            specs.push(spec(stage, StageMode::Repair, alias, 0.0, tokens));
        }
        specs.push(spec(
            StageName::Synthesis,
            StageMode::Retry,
            premium_alias,
            0.8,
            2400,
        ));

        Self { specs }
    }

    pub fn get(&self, stage: StageName, mode: StageMode) -> Result<&StageSpec, ConfigError> {
        self.specs
            .iter()
            .find(|s| s.stage == stage && s.mode == mode)
            .ok_or_else(|| ConfigError::MissingStageSpec {
                stage,
                mode: mode.as_str().to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.specs.iter()
    }
}

impl Default for StageSpecTable {
    fn default() -> Self {
        let quota = QuotaConfig::default();
        Self::defaults(&quota.premium_alias, &quota.base_alias)
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration of the digest pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigestConfig {
    pub context: ContextConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub quota: QuotaConfig,
    pub quality: QualityConfig,
    pub delivery: DeliveryConfig,
    pub pipeline: PipelineConfig,
    pub experiment: Option<ExperimentConfig>,
    pub stages: StageSpecTable,
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, value, "must be between 0.0 and 1.0"));
    }
    Ok(())
}

impl DigestConfig {
    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(DigestError::Config) on the first violation.
    pub fn validate(&self) -> DigestResult<()> {
        self.context.validate()?;

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", retry.max_attempts, "must be at least 1").into());
        }
        if !(retry.multiplier >= 1.0) {
            return Err(invalid("retry.multiplier", retry.multiplier, "must be at least 1.0").into());
        }
        if retry.max_interval_ms < retry.initial_interval_ms {
            return Err(invalid(
                "retry.max_interval_ms",
                retry.max_interval_ms,
                "must not be below initial_interval_ms",
            )
            .into());
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return Err(invalid(
                "circuit_breaker.failure_threshold",
                cb.failure_threshold,
                "must be at least 1",
            )
            .into());
        }
        if cb.half_open_max_calls == 0 {
            return Err(invalid(
                "circuit_breaker.half_open_max_calls",
                cb.half_open_max_calls,
                "must be at least 1",
            )
            .into());
        }

        let quota = &self.quota;
        if quota.premium_alias.trim().is_empty() || quota.base_alias.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "quota.premium_alias/base_alias".to_string(),
            }
            .into());
        }
        if quota.window_secs == 0 {
            return Err(invalid("quota.window_secs", quota.window_secs, "must be positive").into());
        }

        check_unit("quality.threshold", self.quality.threshold)?;

        if self.delivery.required_scope.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "delivery.required_scope".to_string(),
            }
            .into());
        }

        let pipeline = &self.pipeline;
        if pipeline.call_timeout_ms == 0 || pipeline.run_deadline_ms == 0 {
            return Err(invalid(
                "pipeline.call_timeout_ms/run_deadline_ms",
                format!("{}/{}", pipeline.call_timeout_ms, pipeline.run_deadline_ms),
                "must be positive",
            )
            .into());
        }
        if pipeline.max_concurrent_runs == 0 {
            return Err(invalid(
                "pipeline.max_concurrent_runs",
                pipeline.max_concurrent_runs,
                "must be at least 1",
            )
            .into());
        }

        if let Some(experiment) = &self.experiment {
            if experiment.variants.is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: "experiment.variants".to_string(),
                }
                .into());
            }
        }

        for stage in StageName::ALL {
            self.stages.get(stage, StageMode::Primary)?;
            self.stages.get(stage, StageMode::Repair)?;
        }
        self.stages.get(StageName::Synthesis, StageMode::Retry)?;
        for spec in self.stages.iter() {
            if !(0.0..=2.0).contains(&spec.temperature) {
                return Err(invalid(
                    &format!("stages.{}.{}.temperature", spec.stage, spec.mode.as_str()),
                    spec.temperature,
                    "must be between 0.0 and 2.0",
                )
                .into());
            }
            if spec.max_output_tokens == 0 {
                return Err(invalid(
                    &format!("stages.{}.{}.max_output_tokens", spec.stage, spec.mode.as_str()),
                    spec.max_output_tokens,
                    "must be positive",
                )
                .into());
            }
        }

        Ok(())
    }

    /// Apply `TGDIGEST_*` environment overrides on top of this config.
    ///
    /// Environment variables:
    /// - `TGDIGEST_QUALITY_THRESHOLD`
    /// - `TGDIGEST_TOP_N`
    /// - `TGDIGEST_SOFT_SIMILARITY` / `TGDIGEST_HARD_SIMILARITY`
    /// - `TGDIGEST_QUOTA_LIMIT` / `TGDIGEST_TOKEN_BUDGET`
    /// - `TGDIGEST_CIRCUIT_FAILURE_THRESHOLD` / `TGDIGEST_CIRCUIT_RECOVERY_MS`
    /// - `TGDIGEST_MAX_CONCURRENT_RUNS`
    /// - `TGDIGEST_REQUIRED_SCOPE`
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are ignored.
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        if let Some(v) = parsed(&lookup, "TGDIGEST_QUALITY_THRESHOLD") {
            self.quality.threshold = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_TOP_N") {
            self.context.top_n = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_SOFT_SIMILARITY") {
            self.context.soft_similarity = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_HARD_SIMILARITY") {
            self.context.hard_similarity = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_QUOTA_LIMIT") {
            self.quota.quota_limit = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_TOKEN_BUDGET") {
            self.quota.token_budget = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_CIRCUIT_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_CIRCUIT_RECOVERY_MS") {
            self.circuit_breaker.recovery_timeout_ms = v;
        }
        if let Some(v) = parsed(&lookup, "TGDIGEST_MAX_CONCURRENT_RUNS") {
            self.pipeline.max_concurrent_runs = v;
        }
        if let Some(scope) = lookup("TGDIGEST_REQUIRED_SCOPE") {
            if !scope.trim().is_empty() {
                self.delivery.required_scope = scope.trim().to_string();
            }
        }
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DigestError;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DigestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_soft_threshold_above_hard_rejected() {
        let mut config = DigestConfig::default();
        config.context.soft_similarity = 0.97;
        config.context.hard_similarity = 0.9;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, DigestError::Config(ConfigError::InvalidValue { .. })));
        assert!(err.to_string().contains("soft_similarity"));
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let mut config = DigestConfig::default();
        config.context.top_n = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_bounds_rejected() {
        let mut config = DigestConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = DigestConfig::default();
        config.retry.max_interval_ms = 10;
        config.retry.initial_interval_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_synthesis_retry_spec_rejected() {
        let mut config = DigestConfig::default();
        let specs: Vec<StageSpec> = config
            .stages
            .iter()
            .filter(|s| s.mode != StageMode::Retry)
            .cloned()
            .collect();
        config.stages = StageSpecTable::new(specs);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            DigestError::Config(ConfigError::MissingStageSpec {
                stage: StageName::Synthesis,
                ..
            })
        ));
    }

    #[test]
    fn test_default_stage_table_aliases() {
        let table = StageSpecTable::defaults("big", "small");
        let synth = table.get(StageName::Synthesis, StageMode::Primary).unwrap();
        assert_eq!(synth.model_alias, "big");
        assert_eq!(synth.prompt_alias, "digest.synthesis.primary");
        let seg_repair = table.get(StageName::Segmentation, StageMode::Repair).unwrap();
        assert_eq!(seg_repair.model_alias, "small");
        assert_eq!(seg_repair.temperature, 0.0);
        assert!(table.get(StageName::Topics, StageMode::Retry).is_err());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("TGDIGEST_QUALITY_THRESHOLD", "0.75"),
            ("TGDIGEST_TOP_N", "12"),
            ("TGDIGEST_REQUIRED_SCOPE", "digest:send"),
            ("TGDIGEST_QUOTA_LIMIT", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = DigestConfig::default()
            .with_overrides_from(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.quality.threshold, 0.75);
        assert_eq!(config.context.top_n, 12);
        assert_eq!(config.delivery.required_scope, "digest:send");
        assert_eq!(config.quota.quota_limit, QuotaConfig::default().quota_limit);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DigestConfig =
            serde_json::from_str(r#"{"quality": {"threshold": 0.7}}"#).unwrap();
        assert_eq!(config.quality.threshold, 0.7);
        assert_eq!(config.context, ContextConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fill_missing_fields() {
        let config: DigestConfig = serde_json::from_str(
            r#"{"context": {"top_n": 10, "weights": {"media": 0.0}}, "retry": {"max_attempts": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.context.top_n, 10);
        assert_eq!(config.context.weights.media, 0.0);
        assert_eq!(config.context.weights.recency, RankingWeights::default().recency);
        assert_eq!(config.context.soft_similarity, ContextConfig::default().soft_similarity);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_interval_ms, RetryConfig::default().initial_interval_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_in_section_rejected() {
        let parsed = serde_json::from_str::<DigestConfig>(r#"{"retry": {"max_tries": 5}}"#);
        assert!(parsed.is_err());
    }
}
