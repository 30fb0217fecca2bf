//! Text normalization and trigram similarity

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)\S+").expect("valid url regex"));
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@[A-Za-z0-9_]+").expect("valid mention regex"));
static NON_WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid punctuation regex"));

/// Normalize message text for comparison.
///
/// Lowercases, strips URLs and @mentions, folds punctuation into spaces and
/// collapses whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_urls = URL_RE.replace_all(&lowered, " ");
    let without_mentions = MENTION_RE.replace_all(&without_urls, " ");
    let folded = NON_WORD_RE.replace_all(&without_mentions, " ");
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character trigram set of already-normalized text.
///
/// Text shorter than three characters yields a single gram holding the whole text.
pub fn trigrams(normalized: &str) -> HashSet<String> {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.is_empty() {
        return HashSet::new();
    }
    if chars.len() < 3 {
        return std::iter::once(normalized.to_string()).collect();
    }
    chars.windows(3).map(|w| w.iter().collect()).collect()
}

/// Precomputed comparison form of one text.
#[derive(Debug, Clone, Default)]
pub struct Fingerprint {
    grams: HashSet<String>,
}

impl Fingerprint {
    pub fn of(text: &str) -> Self {
        Self {
            grams: trigrams(&normalize(text)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grams.is_empty()
    }

    /// Sørensen-Dice coefficient in [0, 1]. Empty fingerprints never match.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.grams.is_empty() || other.grams.is_empty() {
            return 0.0;
        }
        let shared = self.grams.intersection(&other.grams).count();
        (2 * shared) as f64 / (self.grams.len() + other.grams.len()) as f64
    }
}

/// Similarity of two raw texts.
pub fn similarity(a: &str, b: &str) -> f64 {
    Fingerprint::of(a).similarity(&Fingerprint::of(b))
}
