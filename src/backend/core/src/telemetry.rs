//! Telemetry initialization: structured logging with JSON/pretty formats.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
///
/// Honors `RUST_LOG` when set; falls back to the configured log level.
/// Safe to call once per process; subsequent calls return an error from the
/// subscriber registry.
pub fn init_telemetry(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json_logging {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .try_init()?;
    }

    tracing::info!(
        log_level = %config.log_level,
        json = config.json_logging,
        "Telemetry initialized"
    );

    Ok(())
}
