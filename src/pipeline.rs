//! The pipeline: fetch, deduplicate, batch, classify, aggregate, report,
//! deliver.
//!
//! One invocation processes one subject end to end. Collaborator failures
//! degrade the run (skipped keywords, quarantined batches, recorded
//! delivery errors); only a configuration fault aborts it before work
//! starts.

use crate::aggregate::{RunContext, aggregate};
use crate::api::{AskAsync, RetryPolicy};
use crate::classify::{BatchOutcome, batch, classify};
use crate::deliver::TelegramDelivery;
use crate::error::{MonitorError, Result};
use crate::fetch::fetch_articles;
use crate::models::{RunResult, TokenUsage, Verdict};
use crate::outputs::report::{write_kept_json, write_report};
use crate::outputs::runlog::{save_quarantine, save_run_log};
use crate::sources::ArticleSource;
use crate::subjects::Subject;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Run the full pipeline for one subject.
///
/// `telegram` is `None` when delivery is disabled; `dry_run` stops after
/// the fetch stage and prints what would be classified.
#[instrument(level = "info", skip_all, fields(subject = %subject.slug))]
pub async fn run_subject<S: ArticleSource, C: AskAsync>(
    root: &Path,
    subject: &Subject,
    source: &S,
    client: &C,
    telegram: Option<&TelegramDelivery>,
    dry_run: bool,
) -> Result<RunResult> {
    if subject.keywords.is_empty() {
        return Err(MonitorError::Config(format!(
            "subject '{}' has no keywords",
            subject.slug
        )));
    }

    let started_at = Utc::now();
    let date = started_at.format("%Y-%m-%d").to_string();
    let settings = &subject.settings;
    let policy = RetryPolicy::new(
        settings.max_retries,
        Duration::from_secs(settings.retry_delay_seconds),
    );

    info!(
        keywords = subject.keywords.len(),
        lookback_days = settings.days_lookback,
        "Starting run"
    );

    let (articles, mut errors) = fetch_articles(
        source,
        &policy,
        &subject.keywords,
        settings.days_lookback,
        settings.max_articles_per_run,
    )
    .await;
    let articles_fetched = articles.len();

    if dry_run {
        info!(count = articles_fetched, "Dry run, skipping classification");
        println!("Dry run: {articles_fetched} article(s) would be classified");
        for article in &articles {
            println!("  [{}] {} ({})", article.keyword, article.headline, article.source);
        }
        let ctx = empty_context(subject, date, started_at, articles_fetched, errors);
        // A dry run writes no artifacts, not even a run log.
        return Ok(aggregate(vec![], ctx));
    }

    if articles.is_empty() {
        info!("No articles found");
        if let Some(telegram) = telegram
            && let Err(e) = telegram.send_no_results(&date).await
        {
            warn!(error = %e, "No-results notification failed");
            errors.push(format!("delivery: {e}"));
        }
        let ctx = empty_context(subject, date, started_at, 0, errors);
        let mut result = aggregate(vec![], ctx);
        persist_run_log(root, &mut result).await;
        return Ok(result);
    }

    // Classify batch by batch. A quarantined batch is persisted and the
    // run continues with the rest.
    let requests = batch(articles, settings.batch_size);
    let batches_total = requests.len();
    let extra_defaults = subject.extra_field_defaults();

    let mut verdict_batches: Vec<Vec<Verdict>> = Vec::with_capacity(batches_total);
    let mut quarantined_paths = Vec::new();
    let mut batches_quarantined = 0usize;
    let mut token_usage = TokenUsage::default();

    for request in requests {
        let (outcome, usage) = classify(
            client,
            &policy,
            &subject.slug,
            &subject.prompt,
            request,
            &extra_defaults,
        )
        .await;
        token_usage.accumulate(&usage);

        match outcome {
            BatchOutcome::Classified(verdicts) => verdict_batches.push(verdicts),
            BatchOutcome::Quarantined(quarantined) => {
                batches_quarantined += 1;
                errors.push(format!(
                    "batch {} quarantined: {}",
                    quarantined.batch_index, quarantined.reason
                ));
                match save_quarantine(root, &quarantined).await {
                    Ok(path) => quarantined_paths.push(path.display().to_string()),
                    Err(e) => {
                        error!(error = %e, "Failed to persist quarantined batch");
                        errors.push(format!("quarantine persistence: {e}"));
                    }
                }
            }
        }
    }

    let ctx = RunContext {
        subject: subject.slug.clone(),
        date,
        started_at,
        articles_fetched,
        min_score: settings.min_score,
        batches_total,
        batches_quarantined,
        quarantined_batches: quarantined_paths,
        token_usage,
        errors,
    };
    let mut result = aggregate(verdict_batches, ctx);

    // Report and extract, then best-effort delivery.
    let report_path = match write_report(root, subject, &result).await {
        Ok(path) => path,
        Err(e) => {
            error!(error = %e, "Report write failed");
            result.errors.push(format!("report: {e}"));
            None
        }
    };
    if let Err(e) = write_kept_json(root, subject, &result).await {
        error!(error = %e, "Kept-article extract write failed");
        result.errors.push(format!("kept extract: {e}"));
    }

    if let Some(telegram) = telegram {
        // A run that killed everything gets the short no-results message;
        // a run with quarantines still gets the full summary so the
        // failure is visible in the channel.
        let delivery = if result.kept_count == 0 && result.batches_quarantined == 0 {
            telegram.send_no_results(&result.date).await
        } else {
            telegram.send_summary(&result).await
        };
        if let Err(e) = delivery {
            warn!(error = %e, "Summary delivery failed");
            result.errors.push(format!("delivery: {e}"));
        }
        if let Some(path) = &report_path
            && let Err(e) = telegram.send_report(path).await
        {
            warn!(error = %e, "Report delivery failed");
            result.errors.push(format!("delivery: {e}"));
        }
    }

    persist_run_log(root, &mut result).await;
    Ok(result)
}

/// Write the run log; a persistence failure degrades the run rather than
/// discarding its result.
async fn persist_run_log(root: &Path, result: &mut RunResult) {
    if let Err(e) = save_run_log(root, result).await {
        error!(error = %e, "Failed to save run log");
        result.errors.push(format!("run log: {e}"));
    }
}

fn empty_context(
    subject: &Subject,
    date: String,
    started_at: chrono::DateTime<Utc>,
    articles_fetched: usize,
    errors: Vec<String>,
) -> RunContext {
    RunContext {
        subject: subject.slug.clone(),
        date,
        started_at,
        articles_fetched,
        min_score: subject.settings.min_score,
        batches_total: 0,
        batches_quarantined: 0,
        quarantined_batches: vec![],
        token_usage: TokenUsage::default(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::LlmResponse;
    use crate::models::RawItem;
    use crate::subjects::{CustomFields, Settings};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct StubSource {
        items: Vec<RawItem>,
    }

    impl ArticleSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, keyword: &str, _lookback_days: u32) -> Result<Vec<RawItem>> {
            Ok(self
                .items
                .iter()
                .filter(|i| i.keyword == keyword)
                .cloned()
                .collect())
        }
    }

    enum Scripted {
        Ok(String),
        Fail,
    }

    struct MockClient {
        script: Mutex<Vec<Scripted>>,
    }

    impl AskAsync for MockClient {
        async fn ask(&self, _system: &str, _user: &str) -> Result<LlmResponse> {
            let mut script = self.script.lock().unwrap();
            let step = if script.is_empty() {
                Scripted::Fail
            } else {
                script.remove(0)
            };
            match step {
                Scripted::Ok(text) => Ok(LlmResponse {
                    text,
                    usage: TokenUsage {
                        input_tokens: 100,
                        output_tokens: 50,
                        ..TokenUsage::default()
                    },
                    truncated: false,
                }),
                Scripted::Fail => Err(MonitorError::ResponseParse("scripted".to_string())),
            }
        }
    }

    fn subject(keywords: &[&str], batch_size: usize) -> Subject {
        Subject {
            slug: "rezoning".to_string(),
            name: "Rezoning Monitor".to_string(),
            emoji: "🏗️".to_string(),
            description: String::new(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            target_states: vec![],
            prompt: "You are a filter.".to_string(),
            settings: Settings {
                batch_size,
                max_retries: 2,
                retry_delay_seconds: 0,
                ..Settings::default()
            },
            custom_fields: CustomFields::default(),
        }
    }

    fn item(n: usize, keyword: &str) -> RawItem {
        RawItem {
            title: format!("Story {n}"),
            link: format!("https://example.com/{n}"),
            snippet: String::new(),
            published: Some(Utc::now()),
            source: "Gazette".to_string(),
            keyword: keyword.to_string(),
        }
    }

    fn verdicts_json(count: usize) -> String {
        let elements: Vec<String> = (0..count)
            .map(|_| r#"{"decision":"KEEP","score":8,"classification":"rezoning"}"#.to_string())
            .collect();
        format!("[{}]", elements.join(","))
    }

    #[tokio::test]
    async fn test_run_subject_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource {
            items: (0..4).map(|n| item(n, "rezoning")).collect(),
        };
        let client = MockClient {
            script: Mutex::new(vec![
                Scripted::Ok(verdicts_json(2)),
                Scripted::Ok(verdicts_json(2)),
            ]),
        };

        let result = run_subject(
            tmp.path(),
            &subject(&["rezoning"], 2),
            &source,
            &client,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(result.articles_fetched, 4);
        assert_eq!(result.articles_classified, 4);
        assert_eq!(result.kept_count, 4);
        assert_eq!(result.batches_total, 2);
        assert_eq!(result.batches_quarantined, 0);
        assert_eq!(result.token_usage.input_tokens, 200);
        assert!(tmp.path().join("reports/rezoning").is_dir());
        // Exactly one run log for the run.
        let logs: Vec<_> = std::fs::read_dir(tmp.path().join("logs/rezoning"))
            .unwrap()
            .collect();
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn test_run_subject_quarantines_failing_batch() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource {
            items: (0..4).map(|n| item(n, "rezoning")).collect(),
        };
        // First batch succeeds; second exhausts both attempts.
        let client = MockClient {
            script: Mutex::new(vec![
                Scripted::Ok(verdicts_json(2)),
                Scripted::Fail,
                Scripted::Fail,
            ]),
        };

        let result = run_subject(
            tmp.path(),
            &subject(&["rezoning"], 2),
            &source,
            &client,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(result.articles_classified, 2);
        assert_eq!(result.batches_quarantined, 1);
        assert!(!result.all_batches_quarantined());
        assert_eq!(result.quarantined_batches.len(), 1);
        assert!(tmp.path().join("logs/failed/rezoning").is_dir());
        assert!(result.errors.iter().any(|e| e.contains("quarantined")));
    }

    #[tokio::test]
    async fn test_run_subject_all_quarantined_sets_failure_predicate() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource {
            items: vec![item(0, "rezoning")],
        };
        let client = MockClient {
            script: Mutex::new(vec![]),
        };

        let result = run_subject(
            tmp.path(),
            &subject(&["rezoning"], 25),
            &source,
            &client,
            None,
            false,
        )
        .await
        .unwrap();

        assert!(result.all_batches_quarantined());
        assert_eq!(result.kept_count, 0);
    }

    #[tokio::test]
    async fn test_run_subject_dry_run_skips_classification() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource {
            items: vec![item(0, "rezoning")],
        };
        // If classification ran, the empty script would quarantine the batch
        // and batches_total would be non-zero.
        let client = MockClient {
            script: Mutex::new(vec![]),
        };

        let result = run_subject(
            tmp.path(),
            &subject(&["rezoning"], 25),
            &source,
            &client,
            None,
            true,
        )
        .await
        .unwrap();

        assert_eq!(result.articles_fetched, 1);
        assert_eq!(result.articles_classified, 0);
        assert_eq!(result.batches_total, 0);
        assert!(!tmp.path().join("reports").exists());
        // A dry run leaves no run log behind either.
        assert!(!tmp.path().join("logs").exists());
    }

    #[tokio::test]
    async fn test_run_subject_without_keywords_is_config_fault() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource { items: vec![] };
        let client = MockClient {
            script: Mutex::new(vec![]),
        };

        let err = run_subject(tmp.path(), &subject(&[], 25), &source, &client, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_subject_no_articles_is_clean() {
        let tmp = TempDir::new().unwrap();
        let source = StubSource { items: vec![] };
        let client = MockClient {
            script: Mutex::new(vec![]),
        };

        let result = run_subject(
            tmp.path(),
            &subject(&["rezoning"], 25),
            &source,
            &client,
            None,
            false,
        )
        .await
        .unwrap();

        assert_eq!(result.articles_fetched, 0);
        assert_eq!(result.batches_total, 0);
        assert!(!result.all_batches_quarantined());
    }
}
