//! Retry with exponential backoff for the OpenAI-compatible HTTP providers.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5), unless the server
//!   sends `Retry-After`

use anyhow::{bail, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;

/// Longest `Retry-After` honoured.
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Delay before retry number `attempt` (1-based).
pub(crate) fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
    }
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

pub(crate) fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

/// `POST` `body` as JSON with bearer auth and return the JSON reply,
/// retrying transient failures up to `max_retries` times. `what` names the
/// operation in logs.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
    what: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;
    let mut retry_after = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff_delay(attempt, retry_after.take());
            tracing::debug!(attempt, ?delay, what, "retrying");
            tokio::time::sleep(delay).await;
        }

        let response = match client.post(url).bearer_auth(api_key).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                last_err = Some(anyhow::Error::from(e));
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        retry_after = parse_retry_after(response.headers());
        let body_text = response.text().await.unwrap_or_default();
        if is_retryable(status) {
            last_err = Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
            continue;
        }
        bail!("OpenAI API error {}: {}", status, body_text);
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} failed after retries", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};

    #[test]
    fn test_backoff_progression() {
        assert_eq!(backoff_delay(1, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, None), Duration::from_secs(8));
        assert_eq!(backoff_delay(6, None), Duration::from_secs(32));
        assert_eq!(backoff_delay(12, None), Duration::from_secs(32));
    }

    #[test]
    fn test_retry_after_wins_and_is_capped() {
        assert_eq!(backoff_delay(1, Some(7)), Duration::from_secs(7));
        assert_eq!(backoff_delay(1, Some(3600)), Duration::from_secs(60));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!is_retryable(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(12));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }
}
