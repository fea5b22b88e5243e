//! # Publisher
//! Best-effort fan-out of status events to whoever is listening.
//!
//! `NotifierMux::publish` logs every event once, then hands it to each
//! registered [`Notifier`]. Delivery failures are logged and counted; they
//! never reach the caller, so a broken subscriber cannot stall sampling.

pub mod broadcast;
pub mod webhook;

use anyhow::Result;
use chrono::NaiveDateTime;
use metrics::counter;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

use crate::registry::SourceConfig;
use crate::state::{SampleValue, SourceState, Status};

pub use broadcast::BroadcastNotifier;
pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub source_id: String,
    pub display_name: String,
    pub status: Status,
    #[serde(serialize_with = "crate::state::local_ts::option::serialize")]
    pub last_changed: Option<NaiveDateTime>,
    pub last_value: Option<SampleValue>,
    pub group: String,
}

impl StatusEvent {
    pub fn new(source: &SourceConfig, status: Status, state: &SourceState) -> Self {
        Self {
            source_id: source.id.clone(),
            display_name: source.display_name.clone(),
            status,
            last_changed: state.last_changed,
            last_value: state.last_value.clone(),
            group: source.group.clone(),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, ev: &StatusEvent) -> Result<()>;
    fn name(&self) -> &'static str;
}

#[derive(Clone, Default)]
pub struct NotifierMux {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Webhook delivery when `STATUS_WEBHOOK_URL` is set; nothing else.
    pub fn from_env() -> Self {
        let mut mux = Self::new();
        if let Some(wh) = WebhookNotifier::from_env() {
            tracing::info!(target: "notify", "status webhook enabled");
            mux = mux.with(Arc::new(wh));
        }
        mux
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub async fn publish(&self, ev: &StatusEvent) {
        tracing::info!(
            target: "notify",
            source = %ev.source_id,
            status = %ev.status,
            last_changed = ?ev.last_changed,
            last_value = ?ev.last_value,
            group = %ev.group,
            "EMIT"
        );
        for n in &self.notifiers {
            if let Err(e) = n.send(ev).await {
                counter!("monitor_notify_errors_total", "notifier" => n.name()).increment(1);
                tracing::warn!(
                    target: "notify",
                    notifier = n.name(),
                    source = %ev.source_id,
                    error = %format!("{e:#}"),
                    "delivery failed"
                );
            }
        }
    }
}

/// Keeps every event in memory. Test helper and cheap audit trail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn statuses_for(&self, source_id: &str) -> Vec<Status> {
        self.events()
            .into_iter()
            .filter(|e| e.source_id == source_id)
            .map(|e| e.status)
            .collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, ev: &StatusEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ev.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
