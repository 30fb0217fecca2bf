//! Composite relevance scoring

use crate::similarity::Fingerprint;
use std::cmp::Ordering;
use tgdigest_core::{ContextConfig, Message, RankedMessage, Timestamp};

/// Per-component scores of one message, before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub recency: f64,
    pub reply: f64,
    pub length: f64,
    pub reactions: f64,
    pub media: f64,
    pub history: f64,
}

impl ScoreBreakdown {
    pub fn weighted(&self, config: &ContextConfig) -> f64 {
        let w = &config.weights;
        w.recency * self.recency
            + w.reply * self.reply
            + w.length * self.length
            + w.reactions * self.reactions
            + w.media * self.media
            + w.history * self.history
    }
}

/// Scores messages against a window end and optional history fingerprints.
pub struct Ranker<'a> {
    config: &'a ContextConfig,
    window_end: Timestamp,
    history: Vec<Fingerprint>,
}

impl<'a> Ranker<'a> {
    pub fn new(config: &'a ContextConfig, window_end: Timestamp) -> Self {
        Self {
            config,
            window_end,
            history: Vec::new(),
        }
    }

    /// Enable history affinity against the given recalled texts.
    pub fn with_history<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.history = texts
            .into_iter()
            .map(|t| Fingerprint::of(t.as_ref()))
            .filter(|f| !f.is_empty())
            .collect();
        self
    }

    pub fn breakdown(&self, message: &Message) -> ScoreBreakdown {
        let half_life = self.config.recency_half_life_secs.max(1) as f64;
        let recency = match message.posted_at {
            Some(ts) => {
                let age = (self.window_end - ts).num_milliseconds().max(0) as f64 / 1000.0;
                0.5_f64.powf(age / half_life)
            }
            None => 0.0,
        };

        let chars = message.content.chars().count() as f64;
        let saturation = f64::from(self.config.length_saturation_chars.max(1));

        let history = if self.history.is_empty() {
            0.0
        } else {
            let fingerprint = Fingerprint::of(&message.content);
            self.history
                .iter()
                .map(|h| fingerprint.similarity(h))
                .fold(0.0, f64::max)
        };

        ScoreBreakdown {
            recency,
            reply: if message.reply_target().is_some() { 1.0 } else { 0.0 },
            length: 1.0 - (-chars / saturation).exp(),
            reactions: f64::from(message.reaction_count).ln_1p(),
            media: if message.has_media { 1.0 } else { 0.0 },
            history,
        }
    }

    pub fn score(&self, message: &Message) -> f64 {
        self.breakdown(message).weighted(self.config)
    }

    /// Score and order every message. Highest score first; ties go to the
    /// earlier timestamp, then the lower id.
    pub fn rank(&self, messages: Vec<Message>) -> Vec<RankedMessage> {
        let mut ranked: Vec<RankedMessage> = messages
            .into_iter()
            .map(|message| RankedMessage {
                score: self.score(&message),
                message,
                kept: true,
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked
    }
}

fn compare_ranked(a: &RankedMessage, b: &RankedMessage) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.message.posted_at.cmp(&b.message.posted_at))
        .then_with(|| a.message.id.cmp(&b.message.id))
}
