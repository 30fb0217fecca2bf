//! Optional prior-window history collaborator
//!
//! History only enriches ranking. A missing or failing store degrades the
//! ranking and never fails a run.

use crate::similarity::Fingerprint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tgdigest_core::{HistoryError, TenantId};
use tokio::sync::RwLock;

/// A document recalled from a tenant's history namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDocument {
    pub id: String,
    pub text: String,
    /// Link reported back in `context_history_links`
    #[serde(default)]
    pub link: Option<String>,
}

/// Namespace-per-tenant document store.
#[async_trait]
pub trait ContextHistory: Send + Sync {
    /// Return up to `limit` documents of `namespace` relevant to `query`.
    async fn recall(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<HistoryDocument>, HistoryError>;
}

/// Recall history for a tenant, swallowing and logging any failure.
pub async fn recall_best_effort(
    history: Option<&dyn ContextHistory>,
    tenant_id: &TenantId,
    query: &str,
    limit: usize,
) -> Vec<HistoryDocument> {
    let Some(history) = history else {
        return Vec::new();
    };
    if limit == 0 || query.trim().is_empty() {
        return Vec::new();
    }
    let namespace = tenant_id.namespace();
    match history.recall(&namespace, query, limit).await {
        Ok(mut docs) => {
            docs.truncate(limit);
            tracing::debug!(namespace = %namespace, recalled = docs.len(), "history recalled");
            docs
        }
        Err(err) => {
            tracing::warn!(namespace = %namespace, error = %err, "history recall failed, ranking without history");
            Vec::new()
        }
    }
}

/// In-memory history store. Ranks documents by trigram similarity to the query.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    namespaces: RwLock<HashMap<String, Vec<HistoryDocument>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, namespace: impl Into<String>, doc: HistoryDocument) {
        self.namespaces
            .write()
            .await
            .entry(namespace.into())
            .or_default()
            .push(doc);
    }
}

#[async_trait]
impl ContextHistory for InMemoryHistory {
    async fn recall(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<HistoryDocument>, HistoryError> {
        let guard = self.namespaces.read().await;
        let Some(docs) = guard.get(namespace) else {
            return Ok(Vec::new());
        };
        let query = Fingerprint::of(query);
        let mut scored: Vec<(f64, &HistoryDocument)> = docs
            .iter()
            .map(|d| (query.similarity(&Fingerprint::of(&d.text)), d))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, d)| d.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl ContextHistory for Failing {
        async fn recall(
            &self,
            namespace: &str,
            _query: &str,
            _limit: usize,
        ) -> Result<Vec<HistoryDocument>, HistoryError> {
            Err(HistoryError::QueryFailed {
                namespace: namespace.to_string(),
                reason: "index offline".to_string(),
            })
        }
    }

    fn doc(id: &str, text: &str) -> HistoryDocument {
        HistoryDocument {
            id: id.to_string(),
            text: text.to_string(),
            link: Some(format!("history://{}", id)),
        }
    }

    #[tokio::test]
    async fn test_recall_is_scoped_to_tenant_namespace() {
        let store = InMemoryHistory::new();
        store.insert("tenant:a", doc("1", "deploy pipeline failing")).await;
        store.insert("tenant:b", doc("2", "deploy pipeline failing")).await;

        let docs = recall_best_effort(Some(&store), &TenantId::new("a"), "deploy pipeline", 5).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "1");
    }

    #[tokio::test]
    async fn test_recall_orders_by_relevance_and_limits() {
        let store = InMemoryHistory::new();
        store.insert("tenant:a", doc("weak", "deploy later maybe")).await;
        store.insert("tenant:a", doc("strong", "deploy pipeline failing again")).await;
        store.insert("tenant:a", doc("none", "xyz")).await;

        let docs = store.recall("tenant:a", "deploy pipeline failing", 1).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "strong");
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let docs = recall_best_effort(Some(&Failing), &TenantId::new("a"), "anything", 5).await;
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_absent_store_yields_nothing() {
        let docs = recall_best_effort(None, &TenantId::new("a"), "anything", 5).await;
        assert!(docs.is_empty());
    }
}
