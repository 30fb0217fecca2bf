//! Per-tenant premium quota with deterministic fallback
//!
//! Running out of premium quota is not an error: the stage downgrades to
//! the base alias. Windows roll over lazily on the first check after expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tgdigest_core::{ModelTier, QuotaConfig, TenantId};
use tokio::time::Instant;

/// Counters of one tenant inside the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaState {
    pub calls_used: u32,
    pub tokens_used: u64,
    pub fallbacks: u32,
    pub window_started_at: Instant,
}

impl QuotaState {
    fn fresh(now: Instant) -> Self {
        Self {
            calls_used: 0,
            tokens_used: 0,
            fallbacks: 0,
            window_started_at: now,
        }
    }
}

/// Outcome of a premium check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Estimate reserved, proceed on the premium alias
    Premium,
    /// Quota spent, proceed on the base alias
    Fallback,
}

impl QuotaDecision {
    pub fn tier(&self) -> ModelTier {
        match self {
            Self::Premium => ModelTier::Premium,
            Self::Fallback => ModelTier::Base,
        }
    }
}

/// Alias chosen for one stage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasResolution {
    pub alias: String,
    /// Present only when the requested alias was the premium one
    pub decision: Option<QuotaDecision>,
}

/// Tracks premium usage per tenant.
#[derive(Debug)]
pub struct QuotaGate {
    config: QuotaConfig,
    tenants: Mutex<HashMap<TenantId, QuotaState>>,
    total_fallbacks: AtomicU64,
}

impl QuotaGate {
    pub fn new(config: QuotaConfig) -> Self {
        Self {
            config,
            tenants: Mutex::new(HashMap::new()),
            total_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TenantId, QuotaState>> {
        self.tenants.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tenant state with the window rolled over if it expired.
    fn current<'a>(
        &self,
        tenants: &'a mut HashMap<TenantId, QuotaState>,
        tenant_id: &TenantId,
        now: Instant,
    ) -> &'a mut QuotaState {
        let window = self.config.window();
        let state = tenants
            .entry(tenant_id.clone())
            .or_insert_with(|| QuotaState::fresh(now));
        if now.saturating_duration_since(state.window_started_at) >= window {
            tracing::debug!(tenant_id = %tenant_id, "quota window rolled over");
            *state = QuotaState::fresh(now);
        }
        state
    }

    /// Check and, if allowed, reserve `estimated_tokens` of premium budget.
    pub fn check(&self, tenant_id: &TenantId, estimated_tokens: u64) -> QuotaDecision {
        let now = Instant::now();
        let mut tenants = self.lock();
        let state = self.current(&mut tenants, tenant_id, now);

        let allowed = state.calls_used < self.config.quota_limit
            && state.tokens_used.saturating_add(estimated_tokens) <= self.config.token_budget;
        if allowed {
            state.calls_used += 1;
            state.tokens_used = state.tokens_used.saturating_add(estimated_tokens);
            QuotaDecision::Premium
        } else {
            state.fallbacks += 1;
            self.total_fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                tenant_id = %tenant_id,
                calls_used = state.calls_used,
                tokens_used = state.tokens_used,
                estimated_tokens,
                "premium quota spent, falling back to base model"
            );
            QuotaDecision::Fallback
        }
    }

    /// Route a stage alias through the gate. Only the premium alias is gated.
    pub fn resolve(&self, tenant_id: &TenantId, alias: &str, estimated_tokens: u64) -> AliasResolution {
        if alias != self.config.premium_alias {
            return AliasResolution {
                alias: alias.to_string(),
                decision: None,
            };
        }
        let decision = self.check(tenant_id, estimated_tokens);
        let alias = match decision {
            QuotaDecision::Premium => self.config.premium_alias.clone(),
            QuotaDecision::Fallback => self.config.base_alias.clone(),
        };
        AliasResolution {
            alias,
            decision: Some(decision),
        }
    }

    /// Whether the tenant has no premium calls or tokens left in the current window.
    pub fn is_exhausted(&self, tenant_id: &TenantId) -> bool {
        let now = Instant::now();
        let mut tenants = self.lock();
        let state = self.current(&mut tenants, tenant_id, now);
        state.calls_used >= self.config.quota_limit || state.tokens_used >= self.config.token_budget
    }

    pub fn usage(&self, tenant_id: &TenantId) -> Option<QuotaState> {
        self.lock().get(tenant_id).copied()
    }

    /// Fallbacks across all tenants since startup.
    pub fn total_fallbacks(&self) -> u64 {
        self.total_fallbacks.load(Ordering::Relaxed)
    }
}
