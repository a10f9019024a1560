use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;

use crate::card::build_card;
use crate::error::{NotifyError, Result};
use elkwatch_common::types::LogDocument;

/// Per-attempt HTTP timeout.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff ceiling between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Webhook client for one endpoint.
///
/// Success requires HTTP 200 **and** `code == 0` in the JSON response body;
/// everything else counts as a failed attempt. The caller is expected to
/// wrap [`send_alert`](Self::send_alert) in its overall send budget. The
/// backoff sleeps are cancellation points, so an expired budget or a
/// cancelled rule stops the retry loop immediately.
pub struct WebhookNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()?;
        Ok(Self {
            webhook_url: webhook_url.to_string(),
            client,
        })
    }

    /// Formats the alert card and posts it, retrying up to `max_attempts`.
    pub async fn send_alert(
        &self,
        rule_name: &str,
        index_name: &str,
        logs: &[LogDocument],
        log_count: usize,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<()> {
        let log_count = if log_count == 0 { logs.len() } else { log_count };
        let max_attempts = max_attempts.max(1);

        tracing::info!(
            rule_name,
            index_name,
            log_count,
            max_attempts,
            "Sending alert to webhook"
        );
        let card = build_card(rule_name, index_name, logs, log_count, from, to);

        let mut last_err: Option<NotifyError> = None;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(backoff_with_jitter(attempt - 1)).await;
            }

            match self.post_card(&card).await {
                Ok(()) => {
                    tracing::info!(rule_name, attempt, "Alert sent successfully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(rule_name, attempt, error = %e, "Webhook attempt failed");
                    last_err = Some(e);
                }
            }
        }

        let err = last_err
            .unwrap_or_else(|| NotifyError::InvalidResponse("no attempts made".to_string()));
        tracing::error!(rule_name, attempts = max_attempts, error = %err, "Failed to send alert after all attempts");
        Err(err)
    }

    async fn post_card(&self, card: &Value) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .header("Content-Type", "application/json")
            .json(card)
            .send()
            .await?;

        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        let body: Value = serde_json::from_str(&body_text)
            .map_err(|e| NotifyError::InvalidResponse(format!("{e}: {body_text}")))?;

        if status == reqwest::StatusCode::OK
            && body.get("code").and_then(Value::as_i64) == Some(0)
        {
            return Ok(());
        }

        Err(NotifyError::ApiError {
            status: status.as_u16(),
            body: body_text,
        })
    }
}

/// Backoff before retry `n` (1-based): `min(2^(n-1), 8)` seconds plus up to
/// 250ms of uniform jitter.
fn backoff_with_jitter(n: u32) -> Duration {
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    backoff_base(n) + jitter
}

fn backoff_base(n: u32) -> Duration {
    let base = Duration::from_secs(1 << (n - 1).min(3));
    base.min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_eight_seconds() {
        assert_eq!(backoff_base(1), Duration::from_secs(1));
        assert_eq!(backoff_base(2), Duration::from_secs(2));
        assert_eq!(backoff_base(3), Duration::from_secs(4));
        assert_eq!(backoff_base(4), Duration::from_secs(8));
        assert_eq!(backoff_base(5), Duration::from_secs(8));
        assert_eq!(backoff_base(20), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_under_250ms() {
        for _ in 0..100 {
            let total = backoff_with_jitter(1);
            assert!(total >= Duration::from_secs(1));
            assert!(total < Duration::from_millis(1250));
        }
    }
}
