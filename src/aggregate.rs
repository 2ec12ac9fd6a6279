//! Run aggregation: fold per-batch verdicts into one [`RunResult`].

use crate::models::{RunResult, TokenUsage, Verdict};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

/// Everything the aggregator needs besides the verdicts themselves.
/// Built up by the pipeline as the run progresses.
#[derive(Debug)]
pub struct RunContext {
    pub subject: String,
    pub date: String,
    pub started_at: DateTime<Utc>,
    pub articles_fetched: usize,
    pub min_score: u8,
    pub batches_total: usize,
    pub batches_quarantined: usize,
    /// Paths of persisted quarantine records.
    pub quarantined_batches: Vec<String>,
    pub token_usage: TokenUsage,
    pub errors: Vec<String>,
}

/// Concatenate verdicts in batch submission order and compute the run
/// summary. Quarantined batches contribute nothing here; they are already
/// accounted for in the context's counters.
pub fn aggregate(verdict_batches: Vec<Vec<Verdict>>, ctx: RunContext) -> RunResult {
    let verdicts: Vec<Verdict> = verdict_batches.into_iter().flatten().collect();

    let kept_count = verdicts.iter().filter(|v| v.is_kept(ctx.min_score)).count();
    let killed_count = verdicts.len() - kept_count;

    let mut label_counts: BTreeMap<String, usize> = BTreeMap::new();
    for verdict in verdicts.iter().filter(|v| v.is_kept(ctx.min_score)) {
        let label = if verdict.classification.is_empty() {
            "unclassified".to_string()
        } else {
            verdict.classification.clone()
        };
        *label_counts.entry(label).or_default() += 1;
    }

    let finished_at = Utc::now();
    let elapsed_seconds = (finished_at - ctx.started_at).num_milliseconds() as f64 / 1000.0;

    info!(
        subject = %ctx.subject,
        classified = verdicts.len(),
        kept = kept_count,
        killed = killed_count,
        quarantined = ctx.batches_quarantined,
        "Run aggregated"
    );

    RunResult {
        subject: ctx.subject,
        date: ctx.date,
        started_at: ctx.started_at,
        finished_at,
        elapsed_seconds,
        articles_fetched: ctx.articles_fetched,
        articles_classified: verdicts.len(),
        kept_count,
        killed_count,
        min_score: ctx.min_score,
        label_counts,
        batches_total: ctx.batches_total,
        batches_quarantined: ctx.batches_quarantined,
        quarantined_batches: ctx.quarantined_batches,
        verdicts,
        token_usage: ctx.token_usage,
        errors: ctx.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Decision;

    fn verdict(decision: Decision, score: u8, label: &str) -> Verdict {
        Verdict {
            decision,
            headline: format!("{label} {score}"),
            classification: label.to_string(),
            score,
            city: String::new(),
            state: String::new(),
            location_details: String::new(),
            initiator: String::new(),
            stage: String::new(),
            timeline: String::new(),
            reasoning: String::new(),
            source_url: String::new(),
            next_steps: String::new(),
            extra: BTreeMap::new(),
        }
    }

    fn ctx(articles_fetched: usize, batches_total: usize, batches_quarantined: usize) -> RunContext {
        RunContext {
            subject: "rezoning".to_string(),
            date: "2026-08-30".to_string(),
            started_at: Utc::now(),
            articles_fetched,
            min_score: 5,
            batches_total,
            batches_quarantined,
            quarantined_batches: vec![],
            token_usage: TokenUsage::default(),
            errors: vec![],
        }
    }

    #[test]
    fn test_aggregate_counts_and_order() {
        let batches = vec![
            vec![
                verdict(Decision::Keep, 8, "rezoning"),
                verdict(Decision::Kill, 1, "other"),
            ],
            vec![
                verdict(Decision::Keep, 6, "development"),
                verdict(Decision::Keep, 3, "rezoning"),
            ],
        ];

        let result = aggregate(batches, ctx(4, 2, 0));

        assert_eq!(result.articles_classified, 4);
        // KEEP below the threshold counts as killed.
        assert_eq!(result.kept_count, 2);
        assert_eq!(result.killed_count, 2);
        // Verdicts stay in batch submission order.
        assert_eq!(result.verdicts[0].score, 8);
        assert_eq!(result.verdicts[2].score, 6);
        assert_eq!(result.label_counts.get("rezoning"), Some(&1));
        assert_eq!(result.label_counts.get("development"), Some(&1));
    }

    /// Ten articles in batches of 4,4,2: the fold yields exactly ten
    /// verdicts, in original submission order.
    #[test]
    fn test_aggregate_ten_verdicts_across_three_batches() {
        let mut score = 0u8;
        let mut next = |count: usize| -> Vec<Verdict> {
            (0..count)
                .map(|_| {
                    score += 1;
                    verdict(Decision::Keep, score, "rezoning")
                })
                .collect()
        };
        let batches = vec![next(4), next(4), next(2)];

        let result = aggregate(batches, ctx(10, 3, 0));

        assert_eq!(result.articles_classified, 10);
        let scores: Vec<u8> = result.verdicts.iter().map(|v| v.score).collect();
        assert_eq!(scores, (1..=10).collect::<Vec<u8>>());
    }

    /// One of three batches quarantined: the rest of the run proceeds and
    /// the counters reflect the loss.
    #[test]
    fn test_aggregate_with_partial_quarantine() {
        let batches = vec![
            vec![verdict(Decision::Keep, 7, "rezoning")],
            vec![verdict(Decision::Kill, 0, "other")],
        ];
        let mut context = ctx(3, 3, 1);
        context.quarantined_batches = vec!["logs/failed/rezoning/x_batch2.json".to_string()];

        let result = aggregate(batches, context);

        assert_eq!(result.articles_classified, 2);
        assert_eq!(result.batches_total, 3);
        assert_eq!(result.batches_quarantined, 1);
        assert!(!result.all_batches_quarantined());
        assert_eq!(result.quarantined_batches.len(), 1);
    }

    /// Every batch quarantined: zero verdicts, hard-failure predicate set.
    #[test]
    fn test_aggregate_all_quarantined() {
        let result = aggregate(vec![], ctx(5, 2, 2));

        assert_eq!(result.articles_classified, 0);
        assert_eq!(result.kept_count, 0);
        assert!(result.all_batches_quarantined());
    }

    #[test]
    fn test_aggregate_empty_run() {
        let result = aggregate(vec![], ctx(0, 0, 0));
        assert_eq!(result.articles_classified, 0);
        assert!(!result.all_batches_quarantined());
        assert!(result.label_counts.is_empty());
    }

    #[test]
    fn test_aggregate_unlabeled_keeps_bucketed() {
        let batches = vec![vec![verdict(Decision::Keep, 9, "")]];
        let result = aggregate(batches, ctx(1, 1, 0));
        assert_eq!(result.label_counts.get("unclassified"), Some(&1));
    }
}
