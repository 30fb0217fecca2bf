//! tgdigest Context - Context Engine
//!
//! Turns the raw message sequence of a window into a capped, ranked,
//! deduplicated context. Never calls the model capability and never fails a
//! run: malformed or foreign messages are skipped and counted.

pub mod dedup;
pub mod history;
pub mod rank;
pub mod similarity;

pub use dedup::{deduplicate, DedupOutcome, DedupThresholds};
pub use history::{recall_best_effort, ContextHistory, HistoryDocument, InMemoryHistory};
pub use rank::{Ranker, ScoreBreakdown};
pub use similarity::{normalize, similarity, Fingerprint};

use tgdigest_core::{
    ContextConfig, ContextRankingEntry, ContextStats, ConversationWindow, DigestResult, Message,
    RankedMessage,
};

// ============================================================================
// TOKEN ESTIMATION
// ============================================================================

/// Estimate token count for text.
/// Uses a simple heuristic of ~0.75 tokens per byte.
pub fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f64 * 0.75).ceil() as u64
}

/// Characters of the history query built from the deduplicated window.
const HISTORY_QUERY_CHARS: usize = 2000;

// ============================================================================
// CONTEXT ENGINE
// ============================================================================

/// Deduplicated survivors of a window, before ranking.
#[derive(Debug, Clone, Default)]
pub struct PreparedContext {
    /// Survivors in chronological order
    pub survivors: Vec<Message>,
    pub duplicates_removed: usize,
    pub skipped_malformed: usize,
}

impl PreparedContext {
    /// Query text for the history collaborator: the earliest survivors joined.
    pub fn history_query(&self) -> String {
        let mut query = String::new();
        for message in &self.survivors {
            if query.chars().count() >= HISTORY_QUERY_CHARS {
                break;
            }
            if !query.is_empty() {
                query.push('\n');
            }
            query.push_str(&message.content);
        }
        tgdigest_core::truncate_chars(&query, HISTORY_QUERY_CHARS)
    }
}

/// Ranked context handed to the stage pipeline.
#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    /// At most `top_n` messages, highest score first
    pub ranked: Vec<RankedMessage>,
    pub stats: ContextStats,
    pub history_links: Vec<String>,
}

impl BuiltContext {
    pub fn ranking_entries(&self) -> Vec<ContextRankingEntry> {
        self.ranked
            .iter()
            .map(|r| ContextRankingEntry {
                message_id: r.id(),
                sender: r.message.sender_label(),
                score: r.score,
            })
            .collect()
    }

    /// Ranked messages restored to chronological order.
    pub fn chronological(&self) -> Vec<&RankedMessage> {
        let mut messages: Vec<&RankedMessage> = self.ranked.iter().collect();
        messages.sort_by(|a, b| {
            a.message
                .posted_at
                .cmp(&b.message.posted_at)
                .then_with(|| a.id().cmp(&b.id()))
        });
        messages
    }

    pub fn contains(&self, id: tgdigest_core::MessageId) -> bool {
        self.ranked.iter().any(|r| r.id() == id)
    }
}

/// Context engine: deduplication then ranking.
#[derive(Debug, Clone)]
pub struct ContextEngine {
    config: ContextConfig,
}

impl ContextEngine {
    /// Create a new engine, validating thresholds and weights.
    pub fn new(config: ContextConfig) -> DigestResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Drop messages foreign to the window or without a timestamp, then deduplicate.
    pub fn prepare(&self, window: &ConversationWindow, messages: Vec<Message>) -> PreparedContext {
        let mut skipped = 0;
        let own: Vec<Message> = messages
            .into_iter()
            .filter(|m| {
                let belongs = m.group_id == window.group_id && m.tenant_id == window.tenant_id;
                if !belongs {
                    skipped += 1;
                }
                belongs
            })
            .collect();

        let outcome = deduplicate(own, &DedupThresholds::from_config(&self.config));
        let skipped_malformed = skipped + outcome.undated;
        if skipped_malformed > 0 {
            tracing::debug!(
                window_id = %window.window_id,
                skipped = skipped_malformed,
                "skipped malformed or foreign messages"
            );
        }

        PreparedContext {
            survivors: outcome.kept,
            duplicates_removed: outcome.duplicates_removed,
            skipped_malformed,
        }
    }

    /// Rank the survivors and keep the top `top_n`.
    pub fn rank(
        &self,
        window: &ConversationWindow,
        prepared: PreparedContext,
        history: &[HistoryDocument],
    ) -> BuiltContext {
        let deduplicated_messages = prepared.survivors.len();
        let ranker = Ranker::new(&self.config, window.window_end)
            .with_history(history.iter().map(|d| d.text.as_str()));
        let mut ranked = ranker.rank(prepared.survivors);
        ranked.truncate(self.config.top_n);

        let history_links = history
            .iter()
            .map(|d| d.link.clone().unwrap_or_else(|| d.id.clone()))
            .collect();

        let stats = ContextStats {
            deduplicated_messages,
            duplicates_removed: prepared.duplicates_removed,
            skipped_malformed: prepared.skipped_malformed,
            ranked_messages: ranked.len(),
        };
        tracing::debug!(
            window_id = %window.window_id,
            deduplicated = stats.deduplicated_messages,
            duplicates_removed = stats.duplicates_removed,
            ranked = stats.ranked_messages,
            "context built"
        );

        BuiltContext {
            ranked,
            stats,
            history_links,
        }
    }

    /// Prepare and rank without history.
    pub fn build(&self, window: &ConversationWindow, messages: Vec<Message>) -> BuiltContext {
        let prepared = self.prepare(window, messages);
        self.rank(window, prepared, &[])
    }

    /// Prepare, recall history best-effort, then rank.
    pub async fn build_with_history(
        &self,
        window: &ConversationWindow,
        messages: Vec<Message>,
        history: Option<&dyn ContextHistory>,
    ) -> BuiltContext {
        let prepared = self.prepare(window, messages);
        let docs = recall_best_effort(
            history,
            &window.tenant_id,
            &prepared.history_query(),
            self.config.history_limit,
        )
        .await;
        self.rank(window, prepared, &docs)
    }
}

// ============================================================================
// TESTS
// ============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
