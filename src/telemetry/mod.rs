//! Telemetry: logging and metrics

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, record_cached_vaults, record_stream_connected, record_stream_reconnects};
