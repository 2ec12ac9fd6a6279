//! Article sources.
//!
//! A source answers one question: "what was published for this keyword
//! inside the lookback window?" The fetch coordinator fans out over
//! keywords and owns deduplication and the final recency cutoff; sources
//! own transport, parsing, and their own coarse date filtering.

use crate::error::Result;
use crate::models::RawItem;

pub mod google_news;

/// A feed-style article source queried once per keyword.
pub trait ArticleSource {
    /// Short name for logging.
    fn name(&self) -> &str;

    /// Fetch raw items for one keyword within the lookback window.
    ///
    /// Rate limiting or brief unavailability surfaces as an `Err`; the
    /// caller retries under the shared policy and skips the keyword when
    /// the budget is exhausted.
    async fn fetch(&self, keyword: &str, lookback_days: u32) -> Result<Vec<RawItem>>;
}
