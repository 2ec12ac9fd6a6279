//! Google News RSS search source.
//!
//! One HTTP GET per keyword against the RSS search endpoint, scoped with
//! the `when:<days>d` operator. The feed is plain RSS 2.0; each `<item>`
//! carries a title, a link, a pubDate in RFC 2822, an HTML description,
//! and usually a `<source>` element naming the publication. When
//! `<source>` is absent the publication name is the text after the last
//! `" - "` in the title, a Google News title convention.

use crate::error::{MonitorError, Result};
use crate::models::RawItem;
use crate::sources::ArticleSource;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; SubjectMonitor/0.2)";

pub struct GoogleNewsSource {
    client: reqwest::Client,
}

impl GoogleNewsSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { client })
    }
}

impl ArticleSource for GoogleNewsSource {
    fn name(&self) -> &str {
        "google-news"
    }

    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, keyword: &str, lookback_days: u32) -> Result<Vec<RawItem>> {
        let url = format!(
            "https://news.google.com/rss/search?q={}+when:{}d&hl=en-US&gl=US&ceid=US:en",
            urlencoding::encode(keyword),
            lookback_days
        );
        debug!(%url, "Fetching RSS");

        let xml = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let cutoff = Utc::now() - ChronoDuration::days(i64::from(lookback_days));
        let entries = parse_feed(&xml)?;

        let items: Vec<RawItem> = entries
            .into_iter()
            .filter(|entry| match entry.published {
                Some(ts) => ts >= cutoff,
                // Undated entries are kept; the coordinator cannot judge them either.
                None => true,
            })
            .map(|entry| RawItem {
                title: entry.title,
                link: entry.link,
                snippet: entry.description,
                published: entry.published,
                source: entry.source,
                keyword: keyword.to_string(),
            })
            .collect();

        debug!(keyword, count = items.len(), "Parsed keyword feed");
        Ok(items)
    }
}

#[derive(Debug, Default)]
struct FeedEntry {
    title: String,
    link: String,
    description: String,
    published: Option<DateTime<Utc>>,
    source: String,
}

/// Parse an RSS 2.0 document into feed entries.
///
/// Unknown elements are ignored; a feed with zero `<item>`s parses to an
/// empty list. Only malformed XML is an error.
fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut in_item = false;
    let mut current: Option<&'static str> = None;
    let mut title = String::new();
    let mut link = String::new();
    let mut description = String::new();
    let mut pub_date = String::new();
    let mut source = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" => {
                    in_item = true;
                }
                b"title" if in_item => current = Some("title"),
                b"link" if in_item => current = Some("link"),
                b"description" if in_item => current = Some("description"),
                b"pubDate" if in_item => current = Some("pubDate"),
                b"source" if in_item => current = Some("source"),
                _ => current = None,
            },
            Ok(Event::Text(e)) if in_item => {
                let text = e
                    .unescape()
                    .map_err(|err| MonitorError::FeedParse(err.to_string()))?;
                append_field(
                    current,
                    &text,
                    &mut title,
                    &mut link,
                    &mut description,
                    &mut pub_date,
                    &mut source,
                );
            }
            Ok(Event::CData(e)) if in_item => {
                let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                append_field(
                    current,
                    &text,
                    &mut title,
                    &mut link,
                    &mut description,
                    &mut pub_date,
                    &mut source,
                );
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"item" => {
                    in_item = false;
                    entries.push(finish_entry(
                        std::mem::take(&mut title),
                        std::mem::take(&mut link),
                        std::mem::take(&mut description),
                        std::mem::take(&mut pub_date),
                        std::mem::take(&mut source),
                    ));
                }
                _ => current = None,
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(MonitorError::FeedParse(e.to_string())),
        }
    }

    Ok(entries)
}

#[allow(clippy::too_many_arguments)]
fn append_field(
    current: Option<&'static str>,
    text: &str,
    title: &mut String,
    link: &mut String,
    description: &mut String,
    pub_date: &mut String,
    source: &mut String,
) {
    match current {
        Some("title") => title.push_str(text),
        Some("link") => link.push_str(text),
        Some("description") => description.push_str(text),
        Some("pubDate") => pub_date.push_str(text),
        Some("source") => source.push_str(text),
        _ => {}
    }
}

fn finish_entry(
    title: String,
    link: String,
    description: String,
    pub_date: String,
    source: String,
) -> FeedEntry {
    let published = if pub_date.is_empty() {
        None
    } else {
        match DateTime::parse_from_rfc2822(pub_date.trim()) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!(pub_date = %pub_date, error = %e, "Unparseable pubDate");
                None
            }
        }
    };

    let source = if !source.trim().is_empty() {
        source.trim().to_string()
    } else {
        extract_source_from_title(&title)
    };

    FeedEntry {
        title,
        link,
        description,
        published,
        source,
    }
}

/// Google News titles end with `" - <publication>"`.
fn extract_source_from_title(title: &str) -> String {
    match title.rsplit_once(" - ") {
        Some((_, publication)) if !publication.trim().is_empty() => {
            publication.trim().to_string()
        }
        _ => "Unknown".to_string(),
    }
}
