//! Configuration loading for the digest worker.
//!
//! `[model]` and `[io]` are required. `[digest]` falls back to the pipeline
//! defaults, and `TGDIGEST_*` environment variables override it.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tgdigest_core::{DigestConfig, DigestError};
use tgdigest_llm::HttpModelConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub model: ModelConfig,
    pub io: IoConfig,
    #[serde(default)]
    pub digest: DigestConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub base_url: String,
    /// Name of the environment variable holding the bearer token
    pub api_key_env: Option<String>,
    pub max_concurrent_calls: usize,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoConfig {
    /// JSON lines of `{window, messages}`
    pub input_path: PathBuf,
    /// JSON lines of pipeline results
    pub output_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TGDIGEST_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Invalid digest config: {0}")]
    Digest(#[from] DigestError),
}

impl WorkerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let mut config = Self::from_path(&path)?;
        config.digest = config.digest.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "model.base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.model.base_url.starts_with("http://") && !self.model.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "model.base_url",
                reason: "must be an http(s) URL".to_string(),
            });
        }
        if self.model.max_concurrent_calls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "model.max_concurrent_calls",
                reason: "must be > 0".to_string(),
            });
        }
        if self.model.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "model.request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(name) = &self.model.api_key_env {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "model.api_key_env",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        if self.io.input_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "io.input_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.io.output_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "io.output_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.io.input_path == self.io.output_path {
            return Err(ConfigError::InvalidValue {
                field: "io.output_path",
                reason: "must differ from io.input_path".to_string(),
            });
        }
        self.digest.validate()?;
        Ok(())
    }
}

impl ModelConfig {
    /// HTTP client settings, reading the API key from `api_key_env`.
    pub fn http_config(&self) -> HttpModelConfig {
        HttpModelConfig {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            api_key: self
                .api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty()),
            max_concurrent_calls: self.max_concurrent_calls,
            request_timeout_ms: self.request_timeout_ms,
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("TGDIGEST_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[model]
base_url = "http://127.0.0.1:8080/"
max_concurrent_calls = 3
request_timeout_ms = 90000

[io]
input_path = "windows.jsonl"
output_path = "results.jsonl"
"#;

    #[test]
    fn test_minimal_config_uses_digest_defaults() {
        let config = WorkerConfig::from_toml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.digest, DigestConfig::default());
        assert_eq!(config.model.http_config().base_url, "http://127.0.0.1:8080");
        assert!(config.model.http_config().api_key.is_none());
    }

    #[test]
    fn test_digest_section_is_parsed() {
        let toml = format!(
            "{}\n[digest.quality]\nthreshold = 0.7\n\n[digest.pipeline]\nrun_deadline_ms = 60000\ncall_timeout_ms = 5000\nmax_concurrent_runs = 2\nmin_summary_chars = 40\nevent_type = \"digest.window\"\n",
            MINIMAL
        );
        let config = WorkerConfig::from_toml(&toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.digest.quality.threshold, 0.7);
        assert_eq!(config.digest.pipeline.max_concurrent_runs, 2);
    }

    #[test]
    fn test_partial_digest_sections_use_defaults() {
        let toml = format!(
            "{}\n[digest.context]\ntop_n = 10\n\n[digest.retry]\nmax_attempts = 5\n",
            MINIMAL
        );
        let config = WorkerConfig::from_toml(&toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.digest.context.top_n, 10);
        assert_eq!(config.digest.retry.max_attempts, 5);
        assert_eq!(config.digest.quality, DigestConfig::default().quality);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let toml = format!("{}\n[metrics]\nenabled = true\n", MINIMAL);
        assert!(matches!(WorkerConfig::from_toml(&toml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = WorkerConfig::from_toml(MINIMAL).unwrap();
        config.model.max_concurrent_calls = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "model.max_concurrent_calls", .. })
        ));

        let mut config = WorkerConfig::from_toml(MINIMAL).unwrap();
        config.model.base_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::from_toml(MINIMAL).unwrap();
        config.io.output_path = config.io.input_path.clone();
        assert!(config.validate().is_err());

        let mut config = WorkerConfig::from_toml(MINIMAL).unwrap();
        config.digest.quality.threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Digest(_))));
    }
}
