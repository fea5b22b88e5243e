// src/metrics.rs
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

/// One-time metric descriptions so series show up with help text.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_samples_total", "Published status events, by status.");
        describe_counter!(
            "monitor_renderer_restarts_total",
            "Renderers discarded after repeated failures."
        );
        describe_counter!(
            "monitor_state_save_errors_total",
            "Snapshot writes that failed; in-memory state was kept."
        );
        describe_counter!(
            "monitor_notify_errors_total",
            "Status deliveries that a notifier rejected."
        );
        describe_counter!("monitor_day_rotations_total", "Snapshot day rotations.");
        describe_gauge!(
            "monitor_last_sample_ts",
            "Unix ts of the last completed sample, per source."
        );
    });
}

/// Install the Prometheus recorder with its own HTTP listener when
/// `METRICS_LISTEN` holds a socket address. Returns the bound address.
pub fn init_from_env() -> anyhow::Result<Option<SocketAddr>> {
    let Some(raw) = std::env::var("METRICS_LISTEN").ok().filter(|s| !s.trim().is_empty()) else {
        return Ok(None);
    };
    let addr: SocketAddr = raw
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("METRICS_LISTEN `{raw}` is not a socket address: {e}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("installing prometheus exporter: {e}"))?;
    ensure_described();
    Ok(Some(addr))
}
