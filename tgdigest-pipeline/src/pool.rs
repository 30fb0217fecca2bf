//! Bounded pool of concurrent runs
//!
//! Runs share one orchestrator (and so its breakers and quota counters) but
//! no per-run state. Results come back in submission order.

use crate::orchestrator::Orchestrator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tgdigest_core::{ConversationWindow, Message, PipelineResult};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// One window to digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestJob {
    pub window: ConversationWindow,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct DigestPool {
    orchestrator: Arc<Orchestrator>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl DigestPool {
    /// Pool sized by `pipeline.max_concurrent_runs`.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let limit = orchestrator.config().pipeline.max_concurrent_runs;
        Self::with_limit(orchestrator, limit)
    }

    pub fn with_limit(orchestrator: Arc<Orchestrator>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run every job, at most `limit` at a time.
    pub async fn run_batch(&self, jobs: Vec<DigestJob>) -> Vec<PipelineResult> {
        let mut handles: Vec<(ConversationWindow, JoinHandle<PipelineResult>)> =
            Vec::with_capacity(jobs.len());

        for job in jobs {
            let window = job.window.clone();
            let orchestrator = Arc::clone(&self.orchestrator);
            let permits = Arc::clone(&self.permits);
            let handle = tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return orchestrator
                            .internal_error_result(&job.window, "run pool closed before the run started")
                    }
                };
                orchestrator.run(&job.window, job.messages).await
            });
            handles.push((window, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (window, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(window_id = %window.window_id, error = %err, "digest run task failed");
                    self.orchestrator
                        .internal_error_result(&window, &format!("run task failed: {}", err))
                }
            };
            results.push(result);
        }
        results
    }
}
