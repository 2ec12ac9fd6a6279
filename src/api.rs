//! Classification-service client and the shared retry policy.
//!
//! [`AskAsync`] is the seam between the pipeline and the LLM backend: the
//! orchestrator only ever sees "system prompt + user message in, text +
//! token usage out", which keeps the transport swappable and the tests
//! network-free.
//!
//! [`RetryPolicy`] + [`with_backoff`] are the single retry utility used at
//! every collaborator call site (classification, keyword fetch, delivery):
//! a bounded attempt cap, exponentially doubling delay with a hard cap, and
//! random jitter to avoid thundering herd.

use crate::error::Result;
use crate::models::TokenUsage;
use rand::{Rng, rng};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Bounded exponential backoff: `delay(n) = min(base * 2^(n-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempt cap, including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(60),
            jitter_ms: 250,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1).min(16));
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.jitter_ms)
        };
        delay + Duration::from_millis(jitter)
    }
}

/// Run `op` under `policy`, sleeping between attempts.
///
/// # Arguments
///
/// * `policy` - Attempt cap and delay schedule
/// * `label` - Short name for the call site, used in log lines
/// * `op` - The fallible async operation; invoked once per attempt
///
/// # Returns
///
/// The first success, or the last error once the attempt cap is exhausted.
/// `op` is invoked exactly `max_attempts` times in the always-failing case.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts {
                    error!(label, attempt, max = max_attempts, error = %e, "Exhausted retries");
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(label, attempt, max = max_attempts, ?delay, error = %e, "Attempt failed; backing off");
                sleep(delay).await;
            }
        }
    }
}

/// One classification-service response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The model's text output.
    pub text: String,
    pub usage: TokenUsage,
    /// Whether the response hit the output token cap mid-generation.
    pub truncated: bool,
}

/// Async LLM interaction. Implementors send a system prompt plus one user
/// message and return the model's response.
pub trait AskAsync {
    async fn ask(&self, system_prompt: &str, user_message: &str) -> Result<LlmResponse>;
}

/// Client for an Anthropic-style messages API.
///
/// The system prompt is sent as a single cacheable text block so repeated
/// batches within a run hit the prompt cache.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: UsagePayload,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

impl AnthropicClient {
    pub fn new(api_base: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens: 16384,
        })
    }
}

impl AskAsync for AnthropicClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, system_prompt: &str, user_message: &str) -> Result<LlmResponse> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": [{
                "type": "text",
                "text": system_prompt,
                "cache_control": {"type": "ephemeral"},
            }],
            "messages": [{"role": "user", "content": user_message}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: MessagesResponse = response.json().await?;
        let truncated = parsed.stop_reason.as_deref() == Some("max_tokens");
        if truncated {
            warn!(
                max_tokens = self.max_tokens,
                "Response truncated at the output token cap; consider a smaller batch_size"
            );
        }

        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            text,
            usage: TokenUsage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
                cache_creation_input_tokens: parsed.usage.cache_creation_input_tokens,
                cache_read_input_tokens: parsed.usage.cache_read_input_tokens,
            },
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            jitter_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_with_backoff_returns_first_success() {
        let mut calls = 0u32;
        let result: Result<u32> = with_backoff(&fast_policy(5), "test", || {
            calls += 1;
            let outcome = if calls < 3 {
                Err(MonitorError::ResponseParse("transient".to_string()))
            } else {
                Ok(42)
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_with_backoff_exhausts_exactly_max_attempts() {
        let mut calls = 0u32;
        let result: Result<u32> = with_backoff(&fast_policy(3), "test", || {
            calls += 1;
            async { Err(MonitorError::ResponseParse("always".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter_ms: 0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        // 400ms would exceed the cap.
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(4), Duration::from_millis(350));
    }
}
