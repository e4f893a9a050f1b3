//! Tracing subscriber setup.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. `RUST_LOG` overrides `filter`.
pub fn init_logging(filter: &str, format: LogFormat) -> Result<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .context("invalid log filter")?;

    // Exactly one of the two is Some; a None layer is a no-op.
    let (json_layer, text_layer) = match format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            ),
            None,
        ),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(filter_layer)
        .try_init()
        .context("tracing subscriber already installed")?;

    tracing::debug!(filter, ?format, "Logging initialized");
    Ok(())
}
