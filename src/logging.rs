//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Log output goes to
//! stderr so that command output on stdout stays machine-readable.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let registry = tracing_subscriber::registry().with(filter(level));
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true),
            )
            .try_init(),
    }
    .context("Failed to install tracing subscriber")
}

pub fn init_from_config(logging: &LoggingSection) -> Result<()> {
    init(&logging.level, logging.format)
}
