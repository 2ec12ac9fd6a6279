//! Fetch coordinator: keyword fan-out, merge, dedup, recency cutoff.
//!
//! One fetch per keyword, in keyword order. A keyword whose fetch fails
//! after retries is skipped; partial source failure never aborts the run.
//! All raw items are concatenated, deduplicated (first-seen order), filtered
//! against the lookback cutoff, and capped at the per-run article limit.

use crate::api::{RetryPolicy, with_backoff};
use crate::dedupe::dedupe;
use crate::models::Article;
use crate::sources::ArticleSource;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

/// Keyword fetches in flight at once. `buffered` (not `buffer_unordered`)
/// keeps the results in keyword order, which first-seen dedup depends on.
const FETCH_CONCURRENCY: usize = 4;

/// Fetch and deduplicate articles across all keywords.
///
/// # Arguments
///
/// * `source` - The article source queried once per keyword
/// * `policy` - Retry policy applied to each keyword fetch
/// * `keywords` - Search phrases, fetched and merged in this order
/// * `lookback_days` - Recency window; older dated articles are dropped
/// * `max_articles` - Cap on unique articles, applied in first-seen order
///
/// # Returns
///
/// The unique, in-window articles in first-seen order, plus a note per
/// skipped keyword for the run log.
#[instrument(level = "info", skip(source, policy, keywords), fields(source = source.name(), keywords = keywords.len()))]
pub async fn fetch_articles<S: ArticleSource>(
    source: &S,
    policy: &RetryPolicy,
    keywords: &[String],
    lookback_days: u32,
    max_articles: usize,
) -> (Vec<Article>, Vec<String>) {
    let results: Vec<_> = stream::iter(keywords)
        .map(|keyword| async move {
            let fetched = with_backoff(policy, "keyword-fetch", || {
                source.fetch(keyword, lookback_days)
            })
            .await;
            (keyword, fetched)
        })
        .buffered(FETCH_CONCURRENCY)
        .collect()
        .await;

    let mut raw = Vec::new();
    let mut skipped = Vec::new();
    for (keyword, fetched) in results {
        match fetched {
            Ok(items) => {
                debug!(keyword, count = items.len(), "Keyword fetched");
                raw.extend(items);
            }
            Err(e) => {
                warn!(keyword, error = %e, "Keyword fetch failed; skipping");
                skipped.push(format!("keyword '{keyword}': {e}"));
            }
        }
    }

    let raw_count = raw.len();
    let mut articles = dedupe(raw);

    let cutoff = Utc::now() - ChronoDuration::days(i64::from(lookback_days));
    articles.retain(|a| a.published.is_none_or(|ts| ts >= cutoff));

    if articles.len() > max_articles {
        articles.truncate(max_articles);
    }

    info!(
        raw = raw_count,
        unique = articles.len(),
        keywords = keywords.len(),
        skipped = skipped.len(),
        cap = max_articles,
        "Fetch complete"
    );
    (articles, skipped)
}
