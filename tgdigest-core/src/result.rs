//! Pipeline output types
//!
//! `PipelineResult` is the only thing a run hands back to its caller. It is
//! built once at the end of the run and is not mutated afterwards.

use crate::{
    ContextStats, DeadLetterRecord, GroupId, MessageId, TenantId, TraceId, WindowId,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// STAGE PAYLOADS
// ============================================================================

/// A conversation thread found by segmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub title: String,
    pub message_ids: Vec<MessageId>,
}

/// Overall tone of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Positive,
    Neutral,
    Negative,
    Mixed,
}

impl Tone {
    pub const ALL: [Tone; 4] = [Tone::Positive, Tone::Neutral, Tone::Negative, Tone::Mixed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
            Self::Mixed => "mixed",
        }
    }
}

/// Emotional metrics of the window. Every intensity is in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionMetrics {
    pub tone: Tone,
    pub intensity: f64,
    pub conflict: f64,
    pub collaboration: f64,
    pub stress: f64,
    pub enthusiasm: f64,
}

/// Conversational role a participant can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleName {
    Initiator,
    Contributor,
    Responder,
    Expert,
    Moderator,
    Critic,
    Connector,
    Observer,
}

impl RoleName {
    pub const ALL: [RoleName; 8] = [
        RoleName::Initiator,
        RoleName::Contributor,
        RoleName::Responder,
        RoleName::Expert,
        RoleName::Moderator,
        RoleName::Critic,
        RoleName::Connector,
        RoleName::Observer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiator => "initiator",
            Self::Contributor => "contributor",
            Self::Responder => "responder",
            Self::Expert => "expert",
            Self::Moderator => "moderator",
            Self::Critic => "critic",
            Self::Connector => "connector",
            Self::Observer => "observer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoleWeight {
    pub name: RoleName,
    pub weight: f64,
}

/// Role attribution for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub username: String,
    pub roles: Vec<RoleWeight>,
    pub dominant_role: RoleName,
    pub message_ids: Vec<MessageId>,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicPriority {
    High,
    Medium,
    Low,
}

impl TopicPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    pub priority: TopicPriority,
    pub msg_count: u32,
    pub threads: Vec<String>,
    pub summary: String,
}

/// Scores produced by the evaluation stage. Every score is in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub faithfulness: f64,
    pub coherence: f64,
    pub coverage: f64,
    pub focus: f64,
    pub quality_score: f64,
    pub notes: String,
}

// ============================================================================
// GATES AND DELIVERY
// ============================================================================

/// Comparison against the previous digest of the same group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineDelta {
    pub has_baseline: bool,
    /// Topics absent from the previous digest
    pub novel_topics: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    BlockedRbac,
    BlockedQuality,
    BlockedFailure,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::BlockedRbac => "blocked_rbac",
            Self::BlockedQuality => "blocked_quality",
            Self::BlockedFailure => "blocked_failure",
        }
    }

    pub fn is_blocked(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub status: DeliveryStatus,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// States of the stage state machine, in strict order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    ContextBuilt,
    Segmented,
    EmotionScored,
    RolesAttributed,
    TopicsExtracted,
    Synthesized,
    Evaluated,
    Delivered,
    BlockedQuality,
    BlockedRbac,
    BlockedFailure,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::BlockedQuality | Self::BlockedRbac | Self::BlockedFailure
        )
    }
}

/// One entry of the ranked context, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRankingEntry {
    pub message_id: MessageId,
    pub sender: String,
    pub score: f64,
}

// ============================================================================
// PIPELINE RESULT
// ============================================================================

/// Terminal output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub trace_id: TraceId,
    pub window_id: WindowId,
    pub group_id: GroupId,
    pub tenant_id: TenantId,
    /// Final state reached by the state machine
    pub state: PipelineState,
    /// True when the run stopped before producing a deliverable digest
    pub skip: bool,
    #[serde(alias = "summary")]
    pub summary_html: Option<String>,
    pub topics: Vec<Topic>,
    pub threads: Vec<Thread>,
    #[serde(alias = "role_profile")]
    pub participants: Vec<ParticipantProfile>,
    pub metrics: Option<EmotionMetrics>,
    pub evaluation: Option<Evaluation>,
    pub quality_pass: bool,
    pub baseline_delta: BaselineDelta,
    pub delivery: Delivery,
    pub context_stats: ContextStats,
    pub context_ranking: Vec<ContextRankingEntry>,
    pub context_history_links: Vec<String>,
    pub dlq_events: Vec<DeadLetterRecord>,
    /// Experiment variant assigned to the tenant, if experiments are enabled
    pub variant: Option<String>,
    /// Premium-to-base downgrades made by the quota gate during the run
    pub fallbacks: u32,
    /// Model identities that served stage calls, in call order
    pub models_used: Vec<String>,
}

impl PipelineResult {
    /// Dead-letter records carrying a given error code.
    pub fn dlq_with_code<'a>(
        &'a self,
        code: &'a crate::ErrorCode,
    ) -> impl Iterator<Item = &'a DeadLetterRecord> + 'a {
        self.dlq_events.iter().filter(move |r| &r.error_code == code)
    }

    pub fn has_quality_dead_letter(&self) -> bool {
        self.dlq_events
            .iter()
            .any(|r| r.error_code.is_quality_related())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_serializes_snake_case() {
        let json = serde_json::to_string(&DeliveryStatus::BlockedRbac).unwrap();
        assert_eq!(json, "\"blocked_rbac\"");
        assert_eq!(DeliveryStatus::BlockedQuality.as_str(), "blocked_quality");
        assert!(!DeliveryStatus::Pending.is_blocked());
    }

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Delivered.is_terminal());
        assert!(PipelineState::BlockedFailure.is_terminal());
        assert!(!PipelineState::Synthesized.is_terminal());
    }

    #[test]
    fn test_delivery_reason_omitted_when_absent() {
        let delivery = Delivery {
            status: DeliveryStatus::Pending,
            format: "html".to_string(),
            reason: None,
        };
        let json = serde_json::to_value(&delivery).unwrap();
        assert!(json.get("reason").is_none());
    }
}
