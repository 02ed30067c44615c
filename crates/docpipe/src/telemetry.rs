//! Process-wide logging setup.
//!
//! `tracing` spans and events come from the runner and workers; the
//! database layer and the pool use `log` macros, which are bridged in.

use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::schema::{LogFormat, LoggingConfig};
use crate::error::DocpipeError;

/// Filter from `RUST_LOG`, falling back to the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, DocpipeError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| {
        DocpipeError::Telemetry(format!("invalid log level '{}': {}", config.level, e))
    })
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), DocpipeError> {
    let filter = build_filter(config)?;
    let registry = Registry::default().with(filter);

    let installed = match config.format {
        LogFormat::Text => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    installed.map_err(|e| DocpipeError::Telemetry(e.to_string()))?;

    LogTracer::init().map_err(|e| DocpipeError::Telemetry(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
