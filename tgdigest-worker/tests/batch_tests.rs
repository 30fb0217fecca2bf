//! End-to-end batch runs through the worker with a scripted model

use std::path::Path;
use std::sync::Arc;
use tgdigest_core::{DeliveryStatus, PipelineResult, StageName};
use tgdigest_pipeline::DigestJob;
use tgdigest_test_utils::{fixtures, ScriptedModel};
use tgdigest_worker::{IoConfig, ModelConfig, WorkerConfig};

fn worker_config(dir: &Path) -> WorkerConfig {
    WorkerConfig {
        model: ModelConfig {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key_env: None,
            max_concurrent_calls: 3,
            request_timeout_ms: 1_000,
        },
        io: IoConfig {
            input_path: dir.join("windows.jsonl"),
            output_path: dir.join("results.jsonl"),
        },
        digest: fixtures::digest_config(),
    }
}

fn job_line(tenant: &str, scopes: &[&str]) -> (String, tgdigest_core::WindowId) {
    let window = fixtures::window(tenant, scopes);
    let messages = fixtures::scenario_messages(&window);
    let window_id = window.window_id;
    let line = serde_json::to_string(&DigestJob { window, messages }).unwrap();
    (line, window_id)
}

fn read_results(path: &Path) -> Vec<PipelineResult> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_batch_writes_one_result_per_window_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker_config(dir.path());

    let (first, first_id) = job_line("acme", &[fixtures::DELIVER_SCOPE]);
    let (second, second_id) = job_line("globex", &["digest:read"]);
    let input = format!("{}\nthis is not a job\n\n{}\n", first, second);
    std::fs::write(&config.io.input_path, input).unwrap();

    let model = Arc::new(ScriptedModel::well_formed());
    let summary = tgdigest_worker::run(&config, model.clone()).await.unwrap();

    assert_eq!(summary.windows, 2);
    assert_eq!(summary.malformed_lines, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.dead_letters, 1);

    let results = read_results(&config.io.output_path);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].window_id, first_id);
    assert_eq!(results[0].delivery.status, DeliveryStatus::Pending);
    assert_eq!(results[1].window_id, second_id);
    assert_eq!(results[1].delivery.status, DeliveryStatus::BlockedRbac);
    assert_eq!(model.calls().len(), 2 * StageName::ALL.len());
}

#[tokio::test]
async fn test_empty_input_writes_empty_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker_config(dir.path());
    std::fs::write(&config.io.input_path, "").unwrap();

    let summary = tgdigest_worker::run(&config, Arc::new(ScriptedModel::well_formed()))
        .await
        .unwrap();

    assert_eq!(summary.windows, 0);
    assert_eq!(std::fs::read_to_string(&config.io.output_path).unwrap(), "");
}

#[tokio::test]
async fn test_missing_input_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = worker_config(dir.path());

    let err = tgdigest_worker::run(&config, Arc::new(ScriptedModel::well_formed()))
        .await
        .unwrap_err();
    assert!(matches!(err, tgdigest_worker::WorkerError::Io(_)));
    assert!(!config.io.output_path.exists());
}

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.toml");
    std::fs::write(
        &path,
        r#"
[model]
base_url = "https://models.internal"
api_key_env = "TGDIGEST_TEST_UNSET_KEY"
max_concurrent_calls = 2
request_timeout_ms = 30000

[io]
input_path = "in.jsonl"
output_path = "out.jsonl"

[digest.quota]
premium_alias = "digest-premium"
base_alias = "digest-base"
quota_limit = 10
token_budget = 50000
window_secs = 3600
hard_limit = true
"#,
    )
    .unwrap();

    let config = WorkerConfig::from_path(&path).unwrap();
    config.validate().unwrap();
    assert!(config.digest.quota.hard_limit);
    assert_eq!(config.digest.quota.quota_limit, 10);
    assert_eq!(config.model.http_config().max_concurrent_calls, 2);
    assert!(config.model.http_config().api_key.is_none());
}
