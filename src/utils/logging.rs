//! Structured logging setup.
//!
//! `RUST_LOG` wins over the configured level when it is set, so operators can
//! turn on `trace` for a single module without editing the config file.

use std::sync::OnceLock;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Result, ServerError};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Calling it again is a no-op.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let default_directive = config.log_level.to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .map_err(|e| ServerError::ConfigError(format!("Invalid log filter: {e}")))?;

    let installed = if config.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.with_target)
            .try_init()
    };

    // Another subscriber (e.g. a test harness) may already own the global slot.
    if installed.is_ok() {
        info!(app = %config.app_name, level = %config.log_level, json = config.json_format, "Logging initialized");
    }
    let _ = INSTALLED.set(());
    Ok(())
}
