// src/config/monitor.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use crate::monitor::retry::RetryPolicy;

pub const ENV_MONITOR_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const DEFAULT_MONITOR_CONFIG_PATH: &str = "config/monitor.toml";

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_state_prefix() -> String {
    "monitor_state".to_string()
}
fn default_stale_threshold() -> u32 {
    3
}
fn default_lag_threshold_mins() -> i64 {
    3
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent_fetches() -> usize {
    4
}
fn default_settle_ms() -> u64 {
    80
}
fn default_resync_slack_secs() -> u64 {
    5
}
fn default_extract_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        delay_ms: 600,
    }
}
fn default_renderer_restart() -> RetrySettings {
    RetrySettings {
        max_attempts: 3,
        delay_ms: 1000,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl From<RetrySettings> for RetryPolicy {
    fn from(s: RetrySettings) -> Self {
        RetryPolicy::new(s.max_attempts, Duration::from_millis(s.delay_ms))
    }
}

/// Tuning knobs for the monitor. Every field has a default, so an empty file
/// (or no file at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Directory holding one snapshot file per day.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// File name prefix: `<prefix>_<YYYY-MM-DD>.json`.
    #[serde(default = "default_state_prefix")]
    pub state_prefix: String,
    /// Consecutive unchanged samples before a source is STALE.
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold: u32,
    /// Max minutes a reported time may trail the local clock.
    #[serde(default = "default_lag_threshold_mins")]
    pub lag_threshold_mins: i64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Process-wide cap on simultaneous fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Pause between navigation and the first extraction attempt.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// How far behind schedule a loop may fall before it resynchronizes.
    #[serde(default = "default_resync_slack_secs")]
    pub resync_slack_secs: u64,
    #[serde(default = "default_extract_retry")]
    pub extract_retry: RetrySettings,
    #[serde(default = "default_renderer_restart")]
    pub renderer_restart: RetrySettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            state_prefix: default_state_prefix(),
            stale_threshold: default_stale_threshold(),
            lag_threshold_mins: default_lag_threshold_mins(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            settle_ms: default_settle_ms(),
            resync_slack_secs: default_resync_slack_secs(),
            extract_retry: default_extract_retry(),
            renderer_restart: default_renderer_restart(),
        }
    }
}

impl MonitorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading monitor config {}", path.display()))?;
        let cfg: MonitorConfig = toml::from_str(&data)
            .with_context(|| format!("parsing monitor config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// 1) $MONITOR_CONFIG_PATH (must exist)
    /// 2) config/monitor.toml
    /// 3) built-in defaults
    ///
    /// Env overrides are applied last.
    pub fn load_default() -> Result<Self> {
        let cfg = if let Ok(p) = env::var(ENV_MONITOR_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_MONITOR_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_MONITOR_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_MONITOR_CONFIG_PATH)?
        } else {
            Self::default()
        };
        Ok(cfg.with_env_overrides())
    }

    /// STALE_THRESHOLD, LAG_THRESHOLD_MINS, STATE_DIR. Unparseable values are
    /// ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env::var("STALE_THRESHOLD").ok().and_then(|v| v.trim().parse().ok()) {
            self.stale_threshold = v;
        }
        if let Some(v) = env::var("LAG_THRESHOLD_MINS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.lag_threshold_mins = v;
        }
        if let Ok(v) = env::var("STATE_DIR") {
            if !v.trim().is_empty() {
                self.state_dir = PathBuf::from(v.trim());
            }
        }
        self.sanitized()
    }

    fn sanitized(mut self) -> Self {
        if self.stale_threshold == 0 {
            self.stale_threshold = default_stale_threshold();
        }
        if self.lag_threshold_mins < 0 {
            self.lag_threshold_mins = default_lag_threshold_mins();
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = default_fetch_timeout_secs();
        }
        self.max_concurrent_fetches = self.max_concurrent_fetches.max(1);
        self.extract_retry.max_attempts = self.extract_retry.max_attempts.max(1);
        self.renderer_restart.max_attempts = self.renderer_restart.max_attempts.max(1);
        if self.state_prefix.trim().is_empty() {
            self.state_prefix = default_state_prefix();
        }
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn resync_slack(&self) -> Duration {
        Duration::from_secs(self.resync_slack_secs)
    }
}
