//! Logging configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use code_interpreter_core::config::LoggingConfig;

const DEFAULT_FILTER: &str = "info,code_interpreter=debug";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured filter. Everything is written to
/// stderr: stdout carries execution results and is redirected while a
/// sandbox run is being captured.
pub fn configure_tracing(config: &LoggingConfig, verbosity: u8) -> anyhow::Result<()> {
    let directive = match verbosity {
        0 => config
            .filter
            .clone()
            .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .map_or_else(|| EnvFilter::try_new(&directive), Ok)?;

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
