//! Model capability interface
//!
//! The pipeline treats the model service as an opaque capability with two
//! operations. Any concrete client (HTTP, scripted test double, resilience
//! wrapper) implements this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tgdigest_core::{LlmError, ModelResponse, StageMode, StageName, StageSpec, TenantId, TraceId};

/// One stage invocation as sent to the model capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub stage: StageName,
    pub mode: StageMode,
    pub model_alias: String,
    pub prompt_alias: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Structured input variables: ranked context and prior-stage outputs
    pub variables: serde_json::Value,
    pub tenant_id: TenantId,
    pub trace_id: TraceId,
    pub estimated_tokens: u64,
}

impl InvokeRequest {
    pub fn from_spec(
        spec: &StageSpec,
        variables: serde_json::Value,
        tenant_id: TenantId,
        trace_id: TraceId,
        estimated_tokens: u64,
    ) -> Self {
        Self {
            stage: spec.stage,
            mode: spec.mode,
            model_alias: spec.model_alias.clone(),
            prompt_alias: spec.prompt_alias.clone(),
            temperature: spec.temperature,
            max_output_tokens: spec.max_output_tokens,
            variables,
            tenant_id,
            trace_id,
            estimated_tokens,
        }
    }

    /// Same request routed to a different model alias.
    pub fn with_model_alias(mut self, alias: impl Into<String>) -> Self {
        self.model_alias = alias.into();
        self
    }
}

/// Trait for model capabilities.
#[async_trait]
pub trait ModelCapability: Send + Sync {
    /// Run one stage prompt and return the raw model text.
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError>;

    /// Whether the capability can currently accept calls.
    async fn is_ready(&self) -> bool;
}

#[async_trait]
impl<T: ModelCapability + ?Sized> ModelCapability for Arc<T> {
    async fn invoke(&self, request: InvokeRequest) -> Result<ModelResponse, LlmError> {
        (**self).invoke(request).await
    }

    async fn is_ready(&self) -> bool {
        (**self).is_ready().await
    }
}
