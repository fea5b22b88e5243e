// src/notify/broadcast.rs
//! In-process subscribers (dashboards, tests) via a tokio broadcast channel.

use super::{Notifier, StatusEvent};
use anyhow::Result;
use tokio::sync::broadcast;

/// Not enabled by [`NotifierMux::from_env`](super::NotifierMux::from_env);
/// an embedding process (a dashboard server, say) attaches it with
/// `NotifierMux::with` and hands out `subscribe()` receivers.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<StatusEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl Notifier for BroadcastNotifier {
    async fn send(&self, ev: &StatusEvent) -> Result<()> {
        // No receivers is not a delivery failure.
        let _ = self.tx.send(ev.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "broadcast"
    }
}
