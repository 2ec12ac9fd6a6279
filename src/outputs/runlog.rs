//! Run log and quarantine persistence.
//!
//! Every run writes exactly one run log under `logs/<subject>/`, and one
//! record per quarantined batch under `logs/failed/<subject>/`. Both are
//! pretty-printed JSON so they stay greppable and hand-editable for
//! replay.

use crate::error::Result;
use crate::models::{QuarantinedBatch, RunResult};
use crate::utils::ensure_writable_dir;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

/// Persist the run log as `logs/<subject>/<date>_<time>.json`.
#[instrument(level = "info", skip_all, fields(subject = %result.subject))]
pub async fn save_run_log(root: &Path, result: &RunResult) -> Result<PathBuf> {
    let dir = root.join("logs").join(&result.subject);
    ensure_writable_dir(&dir).await?;

    let stamp = result.started_at.format("%Y-%m-%d_%H%M%S");
    let path = dir.join(format!("{stamp}.json"));
    let json = serde_json::to_string_pretty(result)?;
    fs::write(&path, json).await?;

    info!(path = %path.display(), "Run log saved");
    Ok(path)
}

/// Persist a quarantined batch as
/// `logs/failed/<subject>/<timestamp>_batch<index>.json`.
#[instrument(level = "info", skip_all, fields(subject = %batch.subject, batch = batch.batch_index))]
pub async fn save_quarantine(root: &Path, batch: &QuarantinedBatch) -> Result<PathBuf> {
    let dir = root.join("logs").join("failed").join(&batch.subject);
    ensure_writable_dir(&dir).await?;

    let stamp = batch.quarantined_at.format("%Y-%m-%d_%H%M%S");
    let path = dir.join(format!("{stamp}_batch{}.json", batch.batch_index));
    let json = serde_json::to_string_pretty(batch)?;
    fs::write(&path, json).await?;

    info!(path = %path.display(), "Quarantined batch saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Article, TokenUsage};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn run_result() -> RunResult {
        RunResult {
            subject: "rezoning".to_string(),
            date: "2026-08-30".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            elapsed_seconds: 1.5,
            articles_fetched: 2,
            articles_classified: 2,
            kept_count: 1,
            killed_count: 1,
            min_score: 5,
            label_counts: BTreeMap::new(),
            batches_total: 1,
            batches_quarantined: 0,
            quarantined_batches: vec![],
            verdicts: vec![],
            token_usage: TokenUsage::default(),
            errors: vec![],
        }
    }

    #[tokio::test]
    async fn test_save_run_log_round_trips() {
        let tmp = TempDir::new().unwrap();
        let result = run_result();

        let path = save_run_log(tmp.path(), &result).await.unwrap();
        assert!(path.starts_with(tmp.path().join("logs").join("rezoning")));

        let text = std::fs::read_to_string(&path).unwrap();
        let back: RunResult = serde_json::from_str(&text).unwrap();
        assert_eq!(back.subject, "rezoning");
        assert_eq!(back.articles_fetched, 2);
    }

    #[tokio::test]
    async fn test_save_quarantine_preserves_articles() {
        let tmp = TempDir::new().unwrap();
        let batch = QuarantinedBatch {
            subject: "rezoning".to_string(),
            batch_index: 2,
            quarantined_at: Utc::now(),
            reason: "verdict count mismatch: expected 4, got 3".to_string(),
            articles: vec![Article {
                id: "https://example.com/a".to_string(),
                headline: "Headline".to_string(),
                url: "https://example.com/a".to_string(),
                snippet: String::new(),
                published: None,
                source: "Gazette".to_string(),
                keyword: "rezoning".to_string(),
            }],
        };

        let path = save_quarantine(tmp.path(), &batch).await.unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("_batch2.json")
        );

        let text = std::fs::read_to_string(&path).unwrap();
        let back: QuarantinedBatch = serde_json::from_str(&text).unwrap();
        assert_eq!(back.articles.len(), 1);
        assert!(back.reason.contains("mismatch"));
    }
}
