//! Batching and classification orchestration.
//!
//! Articles are split into fixed-size batches, each batch is sent to the
//! classification service under the shared retry policy, and the returned
//! verdict array is reconciled to the submitted articles **positionally**:
//! the service is contracted to preserve order and cardinality 1:1, and any
//! violation is a retryable fault, never fuzzily re-matched.
//!
//! A batch that exhausts its retry budget is quarantined whole: no partial
//! verdicts are invented and no article-level partial credit is given. A
//! structurally valid response that kills every article is a successful
//! result, not a failure.

use crate::api::{AskAsync, RetryPolicy, with_backoff};
use crate::error::{MonitorError, Result};
use crate::models::{
    Article, ClassificationRequest, Decision, QuarantinedBatch, TokenUsage, Verdict,
};
use crate::utils::{looks_truncated, truncate_for_log};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Split articles into contiguous batches of at most `size`, preserving
/// order. The final batch may be smaller; empty input yields zero batches.
pub fn batch(articles: Vec<Article>, size: usize) -> Vec<ClassificationRequest> {
    let size = size.max(1);
    articles
        .chunks(size)
        .enumerate()
        .map(|(batch_index, chunk)| ClassificationRequest {
            batch_index,
            articles: chunk.to_vec(),
        })
        .collect()
}

/// The outcome of classifying one batch.
#[derive(Debug)]
pub enum BatchOutcome {
    /// One verdict per submitted article, in submission order.
    Classified(Vec<Verdict>),
    /// Retries exhausted; the raw batch is handed back for persistence.
    Quarantined(QuarantinedBatch),
}

/// Classify one batch under the retry policy.
///
/// Each attempt costs one upstream call. Token usage is reported for the
/// successful attempt; a quarantined batch reports zero usage.
///
/// # Arguments
///
/// * `client` - The classification service
/// * `policy` - Attempt cap and backoff schedule for this batch
/// * `subject_slug` - Stamped onto the quarantine record
/// * `prompt` - The subject's system prompt, passed through verbatim
/// * `request` - The batch; consumed whichever way the outcome goes
/// * `extra_defaults` - Default values for subject-defined verdict fields
#[instrument(level = "info", skip_all, fields(subject = subject_slug, batch = request.batch_index, articles = request.articles.len()))]
pub async fn classify<C: AskAsync>(
    client: &C,
    policy: &RetryPolicy,
    subject_slug: &str,
    prompt: &str,
    request: ClassificationRequest,
    extra_defaults: &BTreeMap<String, String>,
) -> (BatchOutcome, TokenUsage) {
    let user_message = build_user_message(&request.articles);

    let outcome = with_backoff(policy, "classify-batch", || {
        attempt(client, prompt, &user_message, &request.articles, extra_defaults)
    })
    .await;

    match outcome {
        Ok((verdicts, usage)) => {
            info!(verdicts = verdicts.len(), "Batch classified");
            (BatchOutcome::Classified(verdicts), usage)
        }
        Err(e) => {
            warn!(error = %e, "Batch quarantined after exhausting retries");
            let quarantined = QuarantinedBatch {
                subject: subject_slug.to_string(),
                batch_index: request.batch_index,
                quarantined_at: Utc::now(),
                reason: e.to_string(),
                articles: request.articles,
            };
            (BatchOutcome::Quarantined(quarantined), TokenUsage::default())
        }
    }
}

async fn attempt<C: AskAsync>(
    client: &C,
    prompt: &str,
    user_message: &str,
    articles: &[Article],
    extra_defaults: &BTreeMap<String, String>,
) -> Result<(Vec<Verdict>, TokenUsage)> {
    let response = client.ask(prompt, user_message).await?;
    // A response cut off at the output token cap always fails to parse;
    // name the real cause so the quarantine reason points at batch_size.
    let payloads = parse_verdict_payloads(&response.text).map_err(|e| {
        if response.truncated {
            MonitorError::ResponseParse(format!(
                "response hit the output token cap before completing the verdict array: {e}"
            ))
        } else {
            e
        }
    })?;
    let verdicts = reconcile(payloads, articles, extra_defaults)?;
    Ok((verdicts, response.usage))
}

/// Build the user message for one batch: a compact JSON array plus an
/// explicit cardinality instruction.
fn build_user_message(articles: &[Article]) -> String {
    let payload: Vec<Value> = articles
        .iter()
        .map(|a| {
            json!({
                "title": a.headline,
                "snippet": a.snippet,
                "url": a.url,
                "published": a.published.map(|ts| ts.to_rfc3339()).unwrap_or_default(),
                "source": a.source,
            })
        })
        .collect();

    format!(
        "Analyze the following {count} articles. Return a JSON array with EXACTLY \
         {count} objects — one KEEP or KILL decision per article, in the same order. \
         Do not skip any.\n\n```json\n{body}\n```",
        count = articles.len(),
        body = Value::Array(payload)
    )
}

/// One element of the model's verdict array, before normalization.
/// `decision` is the only required key; `title` is accepted as an alias for
/// `headline`, and unknown keys land in `extra` for the subject's
/// field mapping.
#[derive(Debug, Deserialize)]
struct VerdictPayload {
    decision: String,
    #[serde(default)]
    headline: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    score: Option<Value>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    location_details: Option<String>,
    #[serde(default)]
    initiator: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    timeline: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    next_steps: Option<String>,
    #[serde(default, flatten)]
    extra: BTreeMap<String, Value>,
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex"));

/// Extract the verdict array from the model's text output.
///
/// Tries a direct parse first, then fenced code blocks, then the outermost
/// bracketed slice. An `{"articles": [...]}` wrapper is tolerated at each
/// tier. Anything else is a retryable parse fault.
fn parse_verdict_payloads(text: &str) -> Result<Vec<VerdictPayload>> {
    if let Some(payloads) = try_parse(text) {
        return Ok(payloads);
    }

    for captures in FENCE_RE.captures_iter(text) {
        if let Some(payloads) = try_parse(&captures[1]) {
            return Ok(payloads);
        }
    }

    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']'))
        && start < end
        && let Some(payloads) = try_parse(&text[start..=end])
    {
        return Ok(payloads);
    }

    // Distinguish a document that ends mid-array from one that never
    // contained an array at all.
    let detail = match serde_json::from_str::<Value>(text.trim()) {
        Err(ref e) if looks_truncated(e) => "verdict array is cut off mid-document",
        _ => "no verdict array in response",
    };
    Err(MonitorError::ResponseParse(format!(
        "{detail}: {}",
        truncate_for_log(text, 200)
    )))
}

fn try_parse(text: &str) -> Option<Vec<VerdictPayload>> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let array = match value {
        Value::Array(array) => array,
        Value::Object(mut object) => match object.remove("articles") {
            Some(Value::Array(array)) => array,
            _ => return None,
        },
        _ => return None,
    };
    serde_json::from_value(Value::Array(array)).ok()
}

/// Match verdicts to articles positionally. A length mismatch is a
/// schema-mismatch fault: retryable, never partially accepted.
fn reconcile(
    payloads: Vec<VerdictPayload>,
    articles: &[Article],
    extra_defaults: &BTreeMap<String, String>,
) -> Result<Vec<Verdict>> {
    if payloads.len() != articles.len() {
        return Err(MonitorError::VerdictCountMismatch {
            expected: articles.len(),
            got: payloads.len(),
        });
    }

    payloads
        .into_iter()
        .zip(articles)
        .map(|(payload, article)| normalize(payload, article, extra_defaults))
        .collect()
}

fn normalize(
    payload: VerdictPayload,
    article: &Article,
    extra_defaults: &BTreeMap<String, String>,
) -> Result<Verdict> {
    let decision = match payload.decision.trim().to_uppercase().as_str() {
        "KEEP" => Decision::Keep,
        "KILL" => Decision::Kill,
        other => {
            return Err(MonitorError::ResponseParse(format!(
                "unknown decision '{other}'"
            )));
        }
    };

    let headline = payload
        .headline
        .or(payload.title)
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| article.headline.clone());

    let source_url = payload
        .source_url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| article.url.clone());

    let extra = extra_defaults
        .iter()
        .map(|(field, default)| {
            let value = payload
                .extra
                .get(field)
                .map(value_to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.clone());
            (field.clone(), value)
        })
        .collect();

    Ok(Verdict {
        decision,
        headline,
        classification: payload.classification.unwrap_or_default(),
        score: clamp_score(payload.score.as_ref()),
        city: payload.city.unwrap_or_default(),
        state: payload.state.unwrap_or_default(),
        location_details: payload.location_details.unwrap_or_default(),
        initiator: payload.initiator.unwrap_or_default(),
        stage: payload.stage.unwrap_or_default(),
        timeline: payload.timeline.unwrap_or_default(),
        reasoning: payload.reasoning.unwrap_or_default(),
        source_url,
        next_steps: payload.next_steps.unwrap_or_default(),
        extra,
    })
}

/// Clamp a model-supplied score to 0-10, tolerating numeric strings and
/// floats. Anything unusable becomes 0.
fn clamp_score(value: Option<&Value>) -> u8 {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    score.clamp(0.0, 10.0) as u8
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}
