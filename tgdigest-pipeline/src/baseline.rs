//! Previous-digest store used for baseline comparison

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tgdigest_core::{BaselineError, GroupId, TenantId, Topic, WindowId};
use tokio::sync::RwLock;

/// What the quality gate keeps of a digest for later comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDigest {
    pub window_id: WindowId,
    pub topic_titles: Vec<String>,
    pub quality_score: f64,
}

impl BaselineDigest {
    pub fn from_topics(window_id: WindowId, topics: &[Topic], quality_score: f64) -> Self {
        Self {
            window_id,
            topic_titles: topics.iter().map(|t| t.title.clone()).collect(),
            quality_score,
        }
    }
}

/// Store of the latest accepted digest per group.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn previous(
        &self,
        tenant_id: &TenantId,
        group_id: GroupId,
    ) -> Result<Option<BaselineDigest>, BaselineError>;

    async fn record(
        &self,
        tenant_id: &TenantId,
        group_id: GroupId,
        digest: BaselineDigest,
    ) -> Result<(), BaselineError>;
}

/// In-memory baseline store.
#[derive(Debug, Default)]
pub struct InMemoryBaselineStore {
    digests: RwLock<HashMap<(TenantId, GroupId), BaselineDigest>>,
}

impl InMemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for InMemoryBaselineStore {
    async fn previous(
        &self,
        tenant_id: &TenantId,
        group_id: GroupId,
    ) -> Result<Option<BaselineDigest>, BaselineError> {
        Ok(self
            .digests
            .read()
            .await
            .get(&(tenant_id.clone(), group_id))
            .cloned())
    }

    async fn record(
        &self,
        tenant_id: &TenantId,
        group_id: GroupId,
        digest: BaselineDigest,
    ) -> Result<(), BaselineError> {
        self.digests
            .write()
            .await
            .insert((tenant_id.clone(), group_id), digest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_is_scoped_by_tenant_and_group() {
        let store = InMemoryBaselineStore::new();
        let acme = TenantId::new("acme");
        let digest = BaselineDigest {
            window_id: WindowId::now_v7(),
            topic_titles: vec!["Release".to_string()],
            quality_score: 0.9,
        };
        store.record(&acme, GroupId(1), digest.clone()).await.unwrap();

        assert_eq!(store.previous(&acme, GroupId(1)).await.unwrap(), Some(digest));
        assert_eq!(store.previous(&acme, GroupId(2)).await.unwrap(), None);
        assert_eq!(store.previous(&TenantId::new("other"), GroupId(1)).await.unwrap(), None);
    }
}
