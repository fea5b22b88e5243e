//! Freshness monitor: binary entrypoint.
//! Loads the monitor config and the source registry, then samples every
//! source until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use feed_freshness_monitor::config::MonitorConfig;
use feed_freshness_monitor::monitor::Monitor;
use feed_freshness_monitor::notify::NotifierMux;
use feed_freshness_monitor::registry::load_registry_default;
use feed_freshness_monitor::render::http::HttpRendererFactory;
use feed_freshness_monitor::SystemClock;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "monitor=info,state=info,notify=info,registry=info,warn";

/// `RUST_LOG` filter (default [`DEFAULT_LOG_FILTER`]);
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Some(addr) = feed_freshness_monitor::metrics::init_from_env()? {
        tracing::info!(target: "monitor", %addr, "prometheus exporter listening");
    }

    let config = MonitorConfig::load_default().context("loading monitor config")?;
    let registry = load_registry_default().context("loading source registry")?;
    tracing::info!(
        target: "monitor",
        sources = registry.len(),
        state_dir = %config.state_dir.display(),
        "configuration loaded"
    );

    let factory = HttpRendererFactory::new().with_timeout(config.fetch_timeout_secs);
    let notifier = NotifierMux::from_env();

    let mut monitor = Monitor::new(
        &config,
        registry,
        Arc::new(factory),
        notifier,
        Arc::new(SystemClock),
    );
    monitor.start();

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!(target: "monitor", "shutdown requested");
    monitor.stop().await;
    Ok(())
}
