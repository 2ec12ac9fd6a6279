//! Cross-keyword article deduplication.
//!
//! The same story routinely shows up in several keyword feeds, usually with
//! different tracking parameters bolted onto the link. Identity is a
//! normalized form of the link (host lowercased, tracking parameters and the
//! trailing slash stripped); when a feed entry carries no link at all the
//! identity falls back to a normalized headline+source composite.
//!
//! First occurrence wins. Duplicates are dropped silently; they are expected
//! across keyword fetches, not an error condition.

use crate::models::{Article, RawItem};
use itertools::Itertools;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Query parameters that vary per fetch without changing the target article.
static TRACKING_PARAMS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["oc", "ved", "usg", "fbclid"]));

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(name)
}

/// Normalize a URL for identity comparison.
///
/// Lowercases the host, drops tracking query parameters and the fragment,
/// and strips a trailing slash from the path. Unparseable URLs are returned
/// lowercased and trimmed so dedup still behaves deterministically.
pub fn normalize_url(raw: &str) -> String {
    let parsed = match Url::parse(raw.trim()) {
        Ok(u) => u,
        Err(_) => return raw.trim().to_lowercase(),
    };

    let host = parsed.host_str().unwrap_or("").to_lowercase();
    let path = parsed.path().trim_end_matches('/');

    let query: String = parsed
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| {
            if v.is_empty() {
                k.into_owned()
            } else {
                format!("{k}={v}")
            }
        })
        .join("&");

    if query.is_empty() {
        format!("{}://{}{}", parsed.scheme(), host, path)
    } else {
        format!("{}://{}{}?{}", parsed.scheme(), host, path, query)
    }
}

/// Compute the stable identity for a raw feed item.
pub fn identity(item: &RawItem) -> String {
    if item.link.trim().is_empty() {
        format!(
            "{}|{}",
            item.title.trim().to_lowercase(),
            item.source.trim().to_lowercase()
        )
    } else {
        normalize_url(&item.link)
    }
}

/// Collapse raw items into unique articles, first-seen order preserved.
///
/// The output never contains two articles with the same identity; its length
/// equals the number of distinct identities in the input. No side effects.
pub fn dedupe(items: Vec<RawItem>) -> Vec<Article> {
    let before = items.len();
    let articles: Vec<Article> = items
        .into_iter()
        .map(|item| {
            let id = identity(&item);
            Article {
                id,
                headline: item.title,
                url: item.link,
                snippet: item.snippet,
                published: item.published,
                source: item.source,
                keyword: item.keyword,
            }
        })
        .unique_by(|a| a.id.clone())
        .collect();

    debug!(
        before,
        after = articles.len(),
        dropped = before - articles.len(),
        "Deduplicated raw items"
    );
    articles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, link: &str, source: &str, keyword: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: link.to_string(),
            snippet: String::new(),
            published: None,
            source: source.to_string(),
            keyword: keyword.to_string(),
        }
    }

    #[test]
    fn test_normalize_url_strips_tracking_params() {
        assert_eq!(
            normalize_url("https://Example.com/story/?oc=5&utm_source=rss&id=7"),
            "https://example.com/story?id=7"
        );
    }

    #[test]
    fn test_normalize_url_lowercases_host_only() {
        assert_eq!(
            normalize_url("https://News.Example.com/Path/To/Story/"),
            "https://news.example.com/Path/To/Story"
        );
    }

    #[test]
    fn test_normalize_url_unparseable_input() {
        assert_eq!(normalize_url("  Not A Url  "), "not a url");
    }

    #[test]
    fn test_identity_falls_back_to_title_and_source() {
        let a = item("City Approves Rezoning", "", "Daily Post", "rezoning");
        let b = item("city approves rezoning", "", "daily post", "zoning change");
        assert_eq!(identity(&a), identity(&b));
    }

    #[test]
    fn test_dedupe_first_occurrence_wins() {
        let items = vec![
            item("A", "https://example.com/a?oc=5", "Post", "k1"),
            item("B", "https://example.com/b", "Post", "k1"),
            item("A duplicate", "https://example.com/a?ved=xyz", "Post", "k2"),
        ];

        let articles = dedupe(items);
        assert_eq!(articles.len(), 2);
        // First-seen wins: the k1 copy of /a survives, in input order.
        assert_eq!(articles[0].headline, "A");
        assert_eq!(articles[0].keyword, "k1");
        assert_eq!(articles[1].headline, "B");
    }

    #[test]
    fn test_dedupe_output_size_equals_distinct_identities() {
        let items = vec![
            item("A", "https://example.com/a", "P", "k1"),
            item("A", "https://example.com/a/", "P", "k2"),
            item("B", "https://example.com/b", "P", "k2"),
            item("C", "", "P", "k3"),
            item("C", "", "P", "k1"),
        ];

        let distinct: std::collections::HashSet<String> =
            items.iter().map(identity).collect();
        let articles = dedupe(items);
        assert_eq!(articles.len(), distinct.len());
        assert_eq!(articles.len(), 3);
    }

    #[test]
    fn test_dedupe_empty_input() {
        assert!(dedupe(vec![]).is_empty());
    }
}
