//! Data models for the monitoring pipeline.
//!
//! The pipeline moves data strictly forward through these types:
//! - [`RawItem`]: one entry from a keyword feed fetch, before deduplication
//! - [`Article`]: a deduplicated item with a stable identity
//! - [`ClassificationRequest`]: one batch of articles bound for the LLM
//! - [`Verdict`]: the LLM's keep/kill decision for exactly one article
//! - [`RunResult`]: the aggregate of all verdicts for one run, persisted as
//!   the run log
//! - [`QuarantinedBatch`]: a batch that exhausted its retries, stored
//!   verbatim for offline inspection or replay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw feed entry as returned by the article source for one keyword.
///
/// Raw items may duplicate each other across keyword fetches; the
/// deduplicator collapses them into [`Article`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    /// The article headline.
    pub title: String,
    /// Link to the article. May be empty when the feed omits it.
    pub link: String,
    /// Snippet or summary text from the feed entry.
    pub snippet: String,
    /// Publish timestamp, when the feed provided a parseable one.
    pub published: Option<DateTime<Utc>>,
    /// The publication name.
    pub source: String,
    /// The keyword whose fetch produced this item.
    pub keyword: String,
}

/// A deduplicated article, immutable once created by the fetch coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Stable identity: the normalized link, or a normalized
    /// headline+source composite when the link is empty.
    pub id: String,
    pub headline: String,
    pub url: String,
    pub snippet: String,
    pub published: Option<DateTime<Utc>>,
    pub source: String,
    /// The first keyword that surfaced this article.
    pub keyword: String,
}

/// One batch of articles submitted to the classification service in a
/// single call. Consumed once by the classification orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRequest {
    /// Zero-based position of this batch within the run.
    pub batch_index: usize,
    pub articles: Vec<Article>,
}

/// The keep/kill decision for one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Keep,
    Kill,
}

/// A normalized classification verdict, reconciled positionally to exactly
/// one submitted [`Article`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub headline: String,
    /// Label from the subject's closed classification set.
    pub classification: String,
    /// Relevance score, clamped to 0-10.
    pub score: u8,
    pub city: String,
    pub state: String,
    pub location_details: String,
    pub initiator: String,
    pub stage: String,
    pub timeline: String,
    pub reasoning: String,
    /// Backfilled from the submitted article when the model leaves it empty.
    pub source_url: String,
    pub next_steps: String,
    /// Subject-defined extra fields, keyed by field name.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl Verdict {
    /// Whether this verdict survives the subject's score threshold.
    pub fn is_kept(&self, min_score: u8) -> bool {
        self.decision == Decision::Keep && self.score >= min_score
    }
}

/// Token counts accumulated across all classification calls in a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_input_tokens: u64,
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }
}

/// The aggregate result of one pipeline run for one subject.
///
/// Written exactly once per run as the run log and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub subject: String,
    /// Run date in `YYYY-MM-DD`.
    pub date: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    /// Unique, in-window articles produced by the fetch coordinator.
    pub articles_fetched: usize,
    /// Articles that received a verdict; equals `articles_fetched` minus
    /// the articles in quarantined batches.
    pub articles_classified: usize,
    pub kept_count: usize,
    pub killed_count: usize,
    /// Score threshold used for the kept/killed split.
    pub min_score: u8,
    /// Kept-article counts per classification label.
    pub label_counts: BTreeMap<String, usize>,
    pub batches_total: usize,
    pub batches_quarantined: usize,
    /// Persisted quarantine record paths, one per quarantined batch.
    pub quarantined_batches: Vec<String>,
    /// All verdicts in batch submission order.
    pub verdicts: Vec<Verdict>,
    pub token_usage: TokenUsage,
    /// Non-fatal errors surfaced during the run (delivery, keyword skips).
    pub errors: Vec<String>,
}

impl RunResult {
    /// A run is a hard failure only when it had batches to classify and
    /// every one of them was quarantined.
    pub fn all_batches_quarantined(&self) -> bool {
        self.batches_total > 0 && self.batches_quarantined == self.batches_total
    }

    /// Verdicts that survive the score threshold, sorted score-descending.
    pub fn kept(&self) -> Vec<&Verdict> {
        let mut kept: Vec<&Verdict> = self
            .verdicts
            .iter()
            .filter(|v| v.is_kept(self.min_score))
            .collect();
        kept.sort_by(|a, b| b.score.cmp(&a.score));
        kept
    }

    /// Verdicts that did not survive, in original order.
    pub fn killed(&self) -> Vec<&Verdict> {
        self.verdicts
            .iter()
            .filter(|v| !v.is_kept(self.min_score))
            .collect()
    }
}

/// A classification batch that exhausted its retries, stored verbatim.
///
/// Quarantined batches never contribute verdicts to the run that produced
/// them; the raw articles are kept for later inspection or replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedBatch {
    pub subject: String,
    pub batch_index: usize,
    pub quarantined_at: DateTime<Utc>,
    /// The last error that exhausted the retry budget.
    pub reason: String,
    pub articles: Vec<Article>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(decision: Decision, score: u8, label: &str) -> Verdict {
        Verdict {
            decision,
            headline: "Headline".to_string(),
            classification: label.to_string(),
            score,
            city: String::new(),
            state: String::new(),
            location_details: String::new(),
            initiator: String::new(),
            stage: String::new(),
            timeline: String::new(),
            reasoning: String::new(),
            source_url: "https://example.com/a".to_string(),
            next_steps: String::new(),
            extra: BTreeMap::new(),
        }
    }

    fn empty_result() -> RunResult {
        RunResult {
            subject: "rezoning".to_string(),
            date: "2026-08-30".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            elapsed_seconds: 0.0,
            articles_fetched: 0,
            articles_classified: 0,
            kept_count: 0,
            killed_count: 0,
            min_score: 5,
            label_counts: BTreeMap::new(),
            batches_total: 0,
            batches_quarantined: 0,
            quarantined_batches: vec![],
            verdicts: vec![],
            token_usage: TokenUsage::default(),
            errors: vec![],
        }
    }

    #[test]
    fn test_decision_serialization_uppercase() {
        assert_eq!(serde_json::to_string(&Decision::Keep).unwrap(), "\"KEEP\"");
        assert_eq!(serde_json::to_string(&Decision::Kill).unwrap(), "\"KILL\"");

        let d: Decision = serde_json::from_str("\"KILL\"").unwrap();
        assert_eq!(d, Decision::Kill);
    }

    #[test]
    fn test_verdict_is_kept_requires_keep_and_score() {
        assert!(verdict(Decision::Keep, 7, "rezoning").is_kept(5));
        assert!(!verdict(Decision::Keep, 4, "rezoning").is_kept(5));
        assert!(!verdict(Decision::Kill, 9, "rezoning").is_kept(5));
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cache_creation_input_tokens: 5,
            cache_read_input_tokens: 0,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 50,
            output_tokens: 10,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 40,
        });
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.output_tokens, 30);
        assert_eq!(total.cache_creation_input_tokens, 5);
        assert_eq!(total.cache_read_input_tokens, 40);
    }

    #[test]
    fn test_run_result_kept_sorted_by_score_desc() {
        let mut result = empty_result();
        result.verdicts = vec![
            verdict(Decision::Keep, 6, "a"),
            verdict(Decision::Kill, 2, "b"),
            verdict(Decision::Keep, 9, "c"),
        ];

        let kept = result.kept();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 9);
        assert_eq!(kept[1].score, 6);
        assert_eq!(result.killed().len(), 1);
    }

    #[test]
    fn test_all_batches_quarantined() {
        let mut result = empty_result();

        // Zero batches is not a hard failure.
        assert!(!result.all_batches_quarantined());

        result.batches_total = 2;
        result.batches_quarantined = 1;
        assert!(!result.all_batches_quarantined());

        result.batches_quarantined = 2;
        assert!(result.all_batches_quarantined());
    }

    #[test]
    fn test_run_result_round_trips_through_json() {
        let mut result = empty_result();
        result.verdicts = vec![verdict(Decision::Keep, 8, "rezoning")];
        result.label_counts.insert("rezoning".to_string(), 1);

        let json = serde_json::to_string(&result).unwrap();
        let back: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.subject, "rezoning");
        assert_eq!(back.verdicts.len(), 1);
        assert_eq!(back.verdicts[0].decision, Decision::Keep);
        assert_eq!(back.label_counts.get("rezoning"), Some(&1));
    }
}
