pub mod monitor;

pub use monitor::{MonitorConfig, RetrySettings};
