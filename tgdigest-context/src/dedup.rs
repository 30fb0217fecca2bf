//! Near-duplicate removal over a chronological message sequence

use crate::similarity::Fingerprint;
use chrono::Duration as ChronoDuration;
use tgdigest_core::{ContextConfig, Message, Timestamp};

/// Duplicate thresholds extracted from the context config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupThresholds {
    pub soft: f64,
    pub hard: f64,
    pub time_gap: ChronoDuration,
}

impl DedupThresholds {
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            soft: config.soft_similarity,
            hard: config.hard_similarity,
            time_gap: i64::try_from(config.dedup_time_gap_secs)
                .ok()
                .and_then(ChronoDuration::try_seconds)
                .unwrap_or(ChronoDuration::MAX),
        }
    }

    /// Whether two messages with this similarity and time distance are duplicates.
    pub fn is_duplicate(&self, similarity: f64, gap: ChronoDuration) -> bool {
        similarity > self.hard || (similarity > self.soft && gap.abs() <= self.time_gap)
    }
}

/// Output of one deduplication scan.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Survivors in chronological order
    pub kept: Vec<Message>,
    pub duplicates_removed: usize,
    /// Messages without a timestamp, dropped before the scan
    pub undated: usize,
}

/// Remove near-duplicates, earliest occurrence wins.
///
/// Messages are stably ordered by timestamp first, so equal timestamps keep
/// their input order. Every message is compared against every survivor so
/// far, which makes the scan transitive and idempotent.
pub fn deduplicate(messages: Vec<Message>, thresholds: &DedupThresholds) -> DedupOutcome {
    let mut dated: Vec<(Timestamp, Message)> = Vec::with_capacity(messages.len());
    let mut undated = 0;
    for message in messages {
        match message.posted_at {
            Some(ts) => dated.push((ts, message)),
            None => undated += 1,
        }
    }
    dated.sort_by_key(|(ts, _)| *ts);

    let mut survivors: Vec<(Timestamp, Fingerprint)> = Vec::with_capacity(dated.len());
    let mut kept = Vec::with_capacity(dated.len());
    let mut duplicates_removed = 0;

    for (ts, message) in dated {
        let fingerprint = Fingerprint::of(&message.content);
        let duplicate = survivors.iter().any(|(earlier_ts, earlier)| {
            thresholds.is_duplicate(fingerprint.similarity(earlier), ts - *earlier_ts)
        });
        if duplicate {
            duplicates_removed += 1;
            continue;
        }
        survivors.push((ts, fingerprint));
        kept.push(message);
    }

    DedupOutcome {
        kept,
        duplicates_removed,
        undated,
    }
}
