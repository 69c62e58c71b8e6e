use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub mod formatter;

pub use formatter::*;

use crate::configs::LoggingConfig;

/// Builds the filter directive from the logging section of the config.
pub fn filter_directive(config: Option<&LoggingConfig>) -> String {
    let log_level = config.and_then(|l| l.level.as_deref()).unwrap_or("info");
    let filters = config.and_then(|l| l.filters.as_deref()).unwrap_or("");

    if filters.is_empty() {
        format!("{},tungstenite=warn", log_level)
    } else {
        format!("{},tungstenite=warn,{}", log_level, filters)
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns `false` if a subscriber was already installed by the host.
pub fn init(config: Option<&LoggingConfig>) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let ansi = config.map(|l| l.ansi).unwrap_or(true);
    let stdout_layer = fmt::layer()
        .event_format(CustomFormatter::new(ansi))
        .with_ansi(ansi);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init()
        .is_ok()
}
