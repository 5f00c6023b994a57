//! # Utility Modules
//!
//! Supporting utilities for logging, deadlines and metrics.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` installation driven by [`crate::config::LoggingConfig`]
//! - **Timeout**: deadline constants and async timeout wrappers
//! - **Metrics**: lock-free observability counters

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::global_metrics;
