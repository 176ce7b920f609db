use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingSettings;

/// Initialize logging from the `[logging]` section of the configuration.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| settings.level.clone());
    init_tracing_with_config(&level, settings.json)
}

/// Initialize tracing with an explicit filter directive and output format
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::debug!(level, json = json_format, "Portway logging initialized");
    Ok(())
}

/// Shutdown tracing gracefully
pub fn shutdown_tracing() {
    // fmt layers write synchronously, nothing is buffered
    tracing::debug!("Portway tracing shutdown complete");
}

/// Span covering one server's lifecycle operations
pub fn server_span(adapter: &str, bind_address: &str, bind_port: u16) -> tracing::Span {
    tracing::info_span!(
        "server",
        adapter,
        bind.address = bind_address,
        bind.port = bind_port,
        runtime.port = tracing::field::Empty,
    )
}
