//! HTTP model client with a concurrency ceiling

use super::{invalid_response, rate_limited, request_failed};
use crate::capability::{InvokeRequest, ModelCapability};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tgdigest_core::{LlmError, ModelResponse};
use tokio::sync::Semaphore;

const PROVIDER: &str = "http";

/// Connection settings for the model service.
#[derive(Clone)]
pub struct HttpModelConfig {
    /// Base URL without trailing slash, e.g. `http://localhost:8080`
    pub base_url: String,
    pub api_key: Option<String>,
    /// Simultaneous in-flight calls allowed by the model service
    pub max_concurrent_calls: usize,
    pub request_timeout_ms: u64,
}

impl Default for HttpModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
            max_concurrent_calls: 3,
            request_timeout_ms: 90_000,
        }
    }
}

impl std::fmt::Debug for HttpModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// Success envelope returned by `POST /v1/invoke`.
#[derive(Debug, Deserialize)]
struct InvokeEnvelope {
    text: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    prompt_alias: Option<String>,
}

/// Error envelope, when the service sends one.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Model capability served over HTTP.
pub struct HttpModelClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<Semaphore>,
    request_timeout: Duration,
}

impl HttpModelClient {
    pub fn new(config: HttpModelConfig) -> Result<Self, LlmError> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms.max(1));
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| request_failed(PROVIDER, 0, format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_calls.max(1))),
            request_timeout,
        })
    }

    /// Permits not currently held by an in-flight call.
    pub fn available_permits(&self) -> usize {
        self.limiter.available_permits()
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                after_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            request_failed(PROVIDER, 0, format!("HTTP request failed: {}", err))
        }
    }
}

#[async_trait]
impl ModelCapability for HttpModelClient {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| request_failed(PROVIDER, 0, format!("Concurrency limiter closed: {}", e)))?;

        let url = format!("{}/v1/invoke", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            let envelope: InvokeEnvelope = response
                .json()
                .await
                .map_err(|e| invalid_response(PROVIDER, format!("Failed to parse response: {}", e)))?;
            return Ok(ModelResponse {
                text: envelope.text,
                model: envelope.model.unwrap_or_else(|| request.model_alias.clone()),
                prompt_alias: envelope
                    .prompt_alias
                    .unwrap_or_else(|| request.prompt_alias.clone()),
            });
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = match serde_json::from_str::<ErrorEnvelope>(&error_text) {
            Ok(envelope) => envelope.error.message,
            Err(_) => error_text,
        };

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => rate_limited(PROVIDER, retry_after_ms),
            _ => request_failed(PROVIDER, status.as_u16(), message),
        })
    }

    async fn is_ready(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.authorize(self.client.get(&url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, base_url = %self.base_url, "model service health check failed");
                false
            }
        }
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

impl std::fmt::Debug for HttpModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpModelClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
