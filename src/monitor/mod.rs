//! # Scheduler
//! Owns one [`worker::SourceWorker`] task per registered source, all
//! sharing the state store, the renderer factory, the publisher and a pool
//! of fetch permits.

pub mod retry;
pub mod worker;

use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;

use crate::classify::ClassifyPolicy;
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::notify::NotifierMux;
use crate::registry::SourceRegistry;
use crate::render::RendererFactory;
use crate::state::{SharedState, Snapshot, StateStore};

pub use retry::RetryPolicy;
pub use worker::{CycleOutcome, SourceWorker, WorkerContext};

pub struct Monitor {
    registry: SourceRegistry,
    ctx: Arc<WorkerContext>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Opens today's snapshot (creating records for new sources and
    /// persisting them) but does not start sampling.
    pub fn new(
        config: &MonitorConfig,
        registry: SourceRegistry,
        factory: Arc<dyn RendererFactory>,
        notifier: NotifierMux,
        clock: Arc<dyn Clock>,
    ) -> Self {
        crate::metrics::ensure_described();
        let store = StateStore::from_config(config);
        let today = clock.now().date();
        let state = Arc::new(SharedState::open(store, registry.ids(), today));
        let ctx = Arc::new(WorkerContext {
            state,
            factory,
            notifier,
            clock,
            policy: ClassifyPolicy::from_config(config),
            extract_retry: config.extract_retry.into(),
            restart: config.renderer_restart.into(),
            fetch_timeout: config.fetch_timeout(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches)),
            settle: config.settle(),
            resync_slack: config.resync_slack(),
        });
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            ctx,
            shutdown,
            handles: Vec::new(),
        }
    }

    pub fn context(&self) -> Arc<WorkerContext> {
        Arc::clone(&self.ctx)
    }

    /// Worker for one source, for driving cycles by hand.
    pub fn worker(&self, id: &str) -> Option<SourceWorker> {
        self.registry
            .get(id)
            .map(|s| SourceWorker::new(s.clone(), self.context()))
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Spawn one loop per source. Calling it again while running is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.shutdown.send_replace(false);
        for source in self.registry.sources() {
            let worker = SourceWorker::new(source.clone(), self.context());
            let rx = self.shutdown.subscribe();
            self.handles.push(tokio::spawn(worker.run(rx)));
        }
        tracing::info!(target: "monitor", sources = self.handles.len(), "monitor started");
    }

    /// Signal every loop and wait for it to finish its current step.
    pub async fn stop(&mut self) {
        self.shutdown.send_replace(true);
        for h in self.handles.drain(..) {
            if let Err(e) = h.await {
                tracing::warn!(target: "monitor", error = %e, "source loop ended abnormally");
            }
        }
        tracing::info!(target: "monitor", "monitor stopped");
    }

    /// Copy of the current day's records.
    pub fn snapshot(&self) -> Snapshot {
        self.ctx.state.snapshot()
    }
}
