//! tgdigest Worker - JSON-lines batch runner
//!
//! Reads `{window, messages}` lines, runs them through a bounded pool and
//! writes one `PipelineResult` line per window, in input order.

pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{ConfigError, IoConfig, ModelConfig, WorkerConfig};
pub use error::{WorkerError, WorkerResult};

use std::sync::Arc;
use tgdigest_core::{DeliveryStatus, PipelineResult};
use tgdigest_llm::ModelCapability;
use tgdigest_pipeline::{DigestJob, DigestPool, Orchestrator};

/// Counts reported after a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub windows: usize,
    /// Input lines that were not a valid job
    pub malformed_lines: usize,
    pub pending: usize,
    pub blocked: usize,
    pub dead_letters: usize,
}

impl BatchSummary {
    fn tally(malformed_lines: usize, results: &[PipelineResult]) -> Self {
        let pending = results
            .iter()
            .filter(|r| r.delivery.status == DeliveryStatus::Pending)
            .count();
        Self {
            windows: results.len(),
            malformed_lines,
            pending,
            blocked: results.len() - pending,
            dead_letters: results.iter().map(|r| r.dlq_events.len()).sum(),
        }
    }
}

/// Parse JSON lines into jobs. Blank lines are ignored; malformed lines are
/// logged and counted.
pub fn parse_jobs(input: &str) -> (Vec<DigestJob>, usize) {
    let mut jobs = Vec::new();
    let mut malformed = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DigestJob>(line) {
            Ok(job) => jobs.push(job),
            Err(err) => {
                malformed += 1;
                tracing::warn!(line = index + 1, error = %err, "skipping malformed input line");
            }
        }
    }
    (jobs, malformed)
}

/// Encode results as JSON lines.
pub fn encode_results(results: &[PipelineResult]) -> WorkerResult<String> {
    let mut out = String::new();
    for result in results {
        out.push_str(&serde_json::to_string(result)?);
        out.push('\n');
    }
    Ok(out)
}

/// Run the batch described by `config.io` against `model`.
pub async fn run(config: &WorkerConfig, model: Arc<dyn ModelCapability>) -> WorkerResult<BatchSummary> {
    let orchestrator = Arc::new(Orchestrator::new(config.digest.clone(), model)?);
    let pool = DigestPool::new(orchestrator);

    let input = tokio::fs::read_to_string(&config.io.input_path).await?;
    let (jobs, malformed) = parse_jobs(&input);
    tracing::info!(
        input = %config.io.input_path.display(),
        windows = jobs.len(),
        malformed,
        max_concurrent_runs = pool.limit(),
        "batch loaded"
    );

    let results = pool.run_batch(jobs).await;
    tokio::fs::write(&config.io.output_path, encode_results(&results)?).await?;

    let summary = BatchSummary::tally(malformed, &results);
    tracing::info!(
        output = %config.io.output_path.display(),
        windows = summary.windows,
        pending = summary.pending,
        blocked = summary.blocked,
        dead_letters = summary.dead_letters,
        "batch written"
    );
    Ok(summary)
}
