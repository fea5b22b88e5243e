// src/notify/webhook.rs
use super::{Notifier, StatusEvent};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

/// POSTs each status event as JSON. Delivery runs on its own task so a slow
/// endpoint never holds up the source loop that published the event.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    event: &'a StatusEvent,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    /// `STATUS_WEBHOOK_URL`, if set and non-blank.
    pub fn from_env() -> Option<Self> {
        std::env::var("STATUS_WEBHOOK_URL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(Self::new)
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver with exponential backoff (500ms, 1s, 2s, ... up to 32s).
    pub async fn deliver(&self, ev: &StatusEvent) -> Result<()> {
        let payload = WebhookPayload {
            text: summary_line(ev),
            event: ev,
        };

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            let err = match res {
                Ok(rsp) => match rsp.error_for_status_ref() {
                    Ok(_) => return Ok(()),
                    Err(e) => anyhow!("webhook HTTP error: {e}"),
                },
                Err(e) => anyhow!("webhook request failed: {e}"),
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            tokio::time::sleep(backoff(attempt)).await;
        }
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, ev: &StatusEvent) -> Result<()> {
        let this = self.clone();
        let ev = ev.clone();
        tokio::spawn(async move {
            if let Err(e) = this.deliver(&ev).await {
                metrics::counter!("monitor_notify_errors_total", "notifier" => "webhook").increment(1);
                tracing::warn!(target: "notify", source = %ev.source_id, error = %e, "webhook delivery gave up");
            }
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

/// Pause after failed attempt `attempt` (1-based), doubling up to 32s.
fn backoff(attempt: u8) -> Duration {
    let exp = u32::from(attempt.saturating_sub(1)).min(6);
    Duration::from_millis(500u64 << exp)
}

fn summary_line(ev: &StatusEvent) -> String {
    let changed = ev
        .last_changed
        .map(|t| t.format(crate::state::TS_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "[{}] {} is {} (last change {})",
        ev.group,
        ev.display_name,
        ev.status.as_str().to_uppercase(),
        changed
    )
}
