//! Telegram delivery.
//!
//! Delivery is best-effort: the pipeline records a delivery failure in the
//! run's error list but never aborts because of one. Each send goes
//! through the shared retry policy with a short budget of its own.

use crate::api::{RetryPolicy, with_backoff};
use crate::error::{MonitorError, Result};
use crate::models::RunResult;
use crate::subjects::Subject;
use reqwest::multipart;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// Kept articles shown inline in the summary message; the full list lives
/// in the attached report.
const SUMMARY_ARTICLE_CAP: usize = 15;

pub struct TelegramDelivery {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    subject_name: String,
    subject_emoji: String,
    policy: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramDelivery {
    pub fn new(token: &str, chat_id: &str, subject: &Subject) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            subject_name: subject.name.clone(),
            subject_emoji: subject.emoji.clone(),
            policy: RetryPolicy::new(3, Duration::from_secs(2)),
        })
    }

    /// Send the run summary: headline stats plus the top kept articles.
    #[instrument(level = "info", skip_all)]
    pub async fn send_summary(&self, result: &RunResult) -> Result<()> {
        let text = format_summary(&self.subject_emoji, &self.subject_name, result);
        self.send_message(&text).await
    }

    /// Tell the channel an otherwise healthy run found nothing.
    #[instrument(level = "info", skip_all)]
    pub async fn send_no_results(&self, date: &str) -> Result<()> {
        let text = format!(
            "{} <b>{}</b> — {}\n\nNo new articles found today.",
            escape(&self.subject_emoji),
            escape(&self.subject_name),
            escape(date)
        );
        self.send_message(&text).await
    }

    /// Upload the HTML report as a document.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn send_report(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report.html".to_string());

        let url = format!("https://api.telegram.org/bot{}/sendDocument", self.token);
        with_backoff(&self.policy, "telegram-document", || {
            let part = multipart::Part::bytes(bytes.clone()).file_name(filename.clone());
            let part = match part.mime_str("text/html") {
                Ok(p) => p,
                Err(_) => multipart::Part::bytes(bytes.clone()).file_name(filename.clone()),
            };
            let form = multipart::Form::new()
                .text("chat_id", self.chat_id.clone())
                .part("document", part);
            self.post(url.clone(), form)
        })
        .await?;

        info!("Report delivered");
        Ok(())
    }

    /// Send a short probe message to verify credentials and chat access.
    pub async fn send_test(&self) -> Result<()> {
        let text = format!(
            "{} <b>{}</b>: delivery test OK",
            escape(&self.subject_emoji),
            escape(&self.subject_name)
        );
        self.send_message(&text).await
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        with_backoff(&self.policy, "telegram-message", || {
            self.post_json(&url, &body)
        })
        .await
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<()> {
        let response = self.client.post(url).json(body).send().await?;
        check(response).await
    }

    async fn post(&self, url: String, form: multipart::Form) -> Result<()> {
        let response = self.client.post(&url).multipart(form).send().await?;
        check(response).await
    }
}

async fn check(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let parsed: TelegramResponse = response.json().await.map_err(|e| {
        MonitorError::Delivery(format!("telegram returned non-JSON ({status}): {e}"))
    })?;
    if !parsed.ok {
        return Err(MonitorError::Delivery(format!(
            "telegram rejected request ({status}): {}",
            parsed.description.unwrap_or_default()
        )));
    }
    Ok(())
}

fn format_summary(emoji: &str, name: &str, result: &RunResult) -> String {
    let mut text = format!(
        "{} <b>{}</b> — {}\n\n\
         📊 {} fetched, {} classified\n\
         ✅ {} kept · ❌ {} killed",
        escape(emoji),
        escape(name),
        escape(&result.date),
        result.articles_fetched,
        result.articles_classified,
        result.kept_count,
        result.killed_count,
    );

    let kept = result.kept();
    let high_priority = kept.iter().filter(|v| v.score >= 8).count();
    if high_priority > 0 {
        text.push_str(&format!("\n🔥 {high_priority} high priority (8+)"));
    }
    if result.batches_quarantined > 0 {
        text.push_str(&format!(
            "\n⚠️ {}/{} batches failed classification",
            result.batches_quarantined, result.batches_total
        ));
    }

    if !kept.is_empty() {
        text.push_str("\n");
        for verdict in kept.iter().take(SUMMARY_ARTICLE_CAP) {
            let mut line = format!(
                "\n<b>[{}]</b> <a href=\"{}\">{}</a>",
                verdict.score,
                escape(&verdict.source_url),
                escape(&verdict.headline)
            );
            let place = [verdict.city.as_str(), verdict.state.as_str()]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(", ");
            if !place.is_empty() {
                line.push_str(&format!(" ({})", escape(&place)));
            }
            text.push_str(&line);
        }
        if kept.len() > SUMMARY_ARTICLE_CAP {
            text.push_str(&format!(
                "\n\n…and {} more in the attached report",
                kept.len() - SUMMARY_ARTICLE_CAP
            ));
        }
    }

    text
}

/// Escape for Telegram's HTML parse mode.
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
