//! Quality gate: threshold check and baseline comparison

use crate::baseline::{BaselineDigest, BaselineStore};
use std::collections::HashSet;
use tgdigest_core::{BaselineDelta, Evaluation, GroupId, TenantId, Topic};

/// Verdict of the gate for one evaluated digest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityVerdict {
    pub quality_pass: bool,
    pub quality_score: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    threshold: f64,
}

impl QualityGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// `quality_pass = quality_score >= threshold`.
    pub fn judge(&self, evaluation: &Evaluation) -> QualityVerdict {
        QualityVerdict {
            quality_pass: evaluation.quality_score >= self.threshold,
            quality_score: evaluation.quality_score,
            threshold: self.threshold,
        }
    }

    /// Delta against the previous digest of the group. A missing or failing
    /// store yields `has_baseline = false`.
    pub async fn baseline_delta(
        &self,
        store: &dyn BaselineStore,
        tenant_id: &TenantId,
        group_id: GroupId,
        topics: &[Topic],
    ) -> BaselineDelta {
        match store.previous(tenant_id, group_id).await {
            Ok(Some(previous)) => delta(&previous, topics),
            Ok(None) => BaselineDelta::default(),
            Err(err) => {
                tracing::warn!(tenant_id = %tenant_id, group_id = %group_id, error = %err, "baseline lookup failed");
                BaselineDelta::default()
            }
        }
    }
}

fn topic_key(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Count topics whose normalized title is absent from the previous digest.
pub fn delta(previous: &BaselineDigest, topics: &[Topic]) -> BaselineDelta {
    let known: HashSet<String> = previous.topic_titles.iter().map(|t| topic_key(t)).collect();
    let novel: HashSet<String> = topics
        .iter()
        .map(|t| topic_key(&t.title))
        .filter(|key| !known.contains(key))
        .collect();
    BaselineDelta {
        has_baseline: true,
        novel_topics: novel.len() as u32,
    }
}
