// src/monitor/worker.rs
//! One long-lived loop per source.
//!
//! A cycle is: window gate, fetch (bounded by the global permit pool and
//! the fetch timeout), settle, extract with retries, classify and persist,
//! publish. Failures only ever change the source's status; the loop itself
//! keeps going until shutdown.

use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use super::retry::RetryPolicy;
use crate::classify::{ClassifyPolicy, Gate, SampleOutcome};
use crate::clock::Clock;
use crate::notify::{NotifierMux, StatusEvent};
use crate::registry::SourceConfig;
use crate::render::{extract_value, Renderer, RendererFactory};
use crate::state::{SharedState, SourceState, Status};

/// Everything the source loops share.
pub struct WorkerContext {
    pub state: Arc<SharedState>,
    pub factory: Arc<dyn RendererFactory>,
    pub notifier: NotifierMux,
    pub clock: Arc<dyn Clock>,
    pub policy: ClassifyPolicy,
    pub extract_retry: RetryPolicy,
    pub restart: RetryPolicy,
    pub fetch_timeout: Duration,
    pub permits: Arc<Semaphore>,
    pub settle: Duration,
    pub resync_slack: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Before the window opened; nothing fetched.
    Skipped,
    /// Retired for the day; `published` on the first such cycle of a run.
    Completed { published: bool },
    /// Sampled; the status published, if any.
    Sampled(Option<Status>),
}

pub struct SourceWorker {
    source: SourceConfig,
    ctx: Arc<WorkerContext>,
    renderer: Option<Box<dyn Renderer>>,
    consecutive_failures: u32,
}

impl SourceWorker {
    pub fn new(source: SourceConfig, ctx: Arc<WorkerContext>) -> Self {
        Self {
            source,
            ctx,
            renderer: None,
            consecutive_failures: 0,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.source.cadence_secs.max(1))
    }

    /// Loop until `shutdown` flips to true (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let cadence = self.cadence();
        let mut next = Instant::now();
        tracing::info!(
            target: "monitor",
            source = %self.source.id,
            cadence_secs = cadence.as_secs(),
            "source loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.run_cycle() => {}
                _ = shutdown.changed() => break,
            }
            next = next_deadline(next, cadence, Instant::now(), self.ctx.resync_slack);
            tokio::select! {
                _ = tokio::time::sleep_until(next) => {}
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!(target: "monitor", source = %self.source.id, "source loop stopped");
    }

    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let now = self.ctx.clock.now();
        let Some((gate, rec)) = Arc::clone(&self.ctx.state)
            .gate_offloaded(self.source.id.clone(), self.source.window, now)
            .await
        else {
            return CycleOutcome::Skipped;
        };

        match gate {
            Gate::Skip => {
                tracing::debug!(target: "monitor", source = %self.source.id, "before window, skipping");
                return CycleOutcome::Skipped;
            }
            Gate::Completed { publish, .. } => {
                if publish {
                    self.publish(Status::Completed, &rec).await;
                }
                // no more sampling today
                self.renderer = None;
                self.consecutive_failures = 0;
                return CycleOutcome::Completed { published: publish };
            }
            Gate::Sample => {}
        }

        let outcome = self.sample().await;
        let failed = !matches!(outcome, SampleOutcome::Value(_));

        let now = self.ctx.clock.now();
        let Some((status, rec)) = Arc::clone(&self.ctx.state)
            .apply_offloaded(self.source.id.clone(), outcome, self.ctx.policy, now)
            .await
        else {
            return CycleOutcome::Sampled(None);
        };
        gauge!("monitor_last_sample_ts", "source" => self.source.id.clone())
            .set(chrono::Utc::now().timestamp() as f64);

        if let Some(st) = status {
            self.publish(st, &rec).await;
        }
        self.track_failure(failed).await;
        CycleOutcome::Sampled(status)
    }

    async fn sample(&mut self) -> SampleOutcome {
        if self.renderer.is_none() {
            match self.ctx.factory.create().await {
                Ok(r) => {
                    tracing::debug!(target: "monitor", source = %self.source.id, renderer = r.name(), "renderer ready");
                    self.renderer = Some(r);
                }
                Err(e) => {
                    tracing::warn!(target: "monitor", source = %self.source.id, error = %e, "renderer unavailable");
                    return SampleOutcome::FetchFailed;
                }
            }
        }
        let Some(renderer) = self.renderer.as_deref() else {
            return SampleOutcome::FetchFailed;
        };

        let Ok(permit) = self.ctx.permits.acquire().await else {
            return SampleOutcome::FetchFailed;
        };
        let fetched = tokio::time::timeout(self.ctx.fetch_timeout, renderer.fetch(&self.source.url)).await;
        drop(permit);

        let doc = match fetched {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => {
                tracing::warn!(target: "monitor", source = %self.source.id, url = %self.source.url, error = %e, "fetch failed");
                return SampleOutcome::FetchFailed;
            }
            Err(_) => {
                tracing::warn!(
                    target: "monitor",
                    source = %self.source.id,
                    timeout_secs = self.ctx.fetch_timeout.as_secs(),
                    "fetch timed out"
                );
                return SampleOutcome::FetchFailed;
            }
        };

        if !self.ctx.settle.is_zero() {
            tokio::time::sleep(self.ctx.settle).await;
        }

        let doc = doc.as_ref();
        let source = &self.source;
        let value = self
            .ctx
            .extract_retry
            .retry_until_some(move |attempt| async move {
                let v = extract_value(doc, source).await;
                if v.is_none() {
                    tracing::debug!(target: "monitor", source = %source.id, attempt, "nothing extracted");
                }
                v
            })
            .await;

        match value {
            Some(v) => SampleOutcome::Value(v),
            None => SampleOutcome::Empty,
        }
    }

    /// Consecutive ERROR/INVALID cycles beyond the restart budget throw the
    /// renderer away; the next cycle builds a new one.
    async fn track_failure(&mut self, failed: bool) {
        if !failed {
            self.consecutive_failures = 0;
            return;
        }
        self.consecutive_failures += 1;
        if !self.ctx.restart.exhausted(self.consecutive_failures) {
            return;
        }
        tracing::warn!(
            target: "monitor",
            source = %self.source.id,
            failures = self.consecutive_failures,
            "restarting renderer"
        );
        counter!("monitor_renderer_restarts_total", "source" => self.source.id.clone()).increment(1);
        self.renderer = None;
        self.consecutive_failures = 0;
        tokio::time::sleep(self.ctx.restart.delay).await;
    }

    async fn publish(&self, status: Status, rec: &SourceState) {
        counter!("monitor_samples_total", "status" => status.as_str()).increment(1);
        let ev = StatusEvent::new(&self.source, status, rec);
        self.ctx.notifier.publish(&ev).await;
    }
}

/// Next wake-up on a fixed grid of `cadence` steps from the loop start. A
/// loop that fell more than `slack` behind restarts the grid from `now`
/// instead of firing a burst of catch-up cycles.
pub fn next_deadline(prev: Instant, cadence: Duration, now: Instant, slack: Duration) -> Instant {
    let next = prev + cadence;
    if next + slack < now {
        now + cadence
    } else {
        next
    }
}
