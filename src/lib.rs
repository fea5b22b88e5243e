// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod classify;
pub mod clock;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod registry;
pub mod render;
pub mod state;
pub mod timestamp;

// ---- Re-exports for stable public API ----
pub use crate::classify::{ClassifyPolicy, Gate, SampleOutcome};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::MonitorConfig;
pub use crate::monitor::{CycleOutcome, Monitor, SourceWorker};
pub use crate::notify::{Notifier, NotifierMux, StatusEvent};
pub use crate::registry::{SourceConfig, SourceRegistry};
pub use crate::state::{SampleValue, SourceState, Status};
pub use crate::timestamp::parse_reported;
