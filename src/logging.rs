//! Structured logging setup using `tracing-subscriber`.
//!
//! Everything goes to stderr so stdout only carries the recommendation.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive for `verbosity` repetitions of `-v`, if any.
pub fn verbosity_directive(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Initialise logging for the CLI.
///
/// `RUST_LOG` wins over `-v`, which wins over the configured level.
pub fn init_cli(config: &LoggingConfig, verbosity: u8) {
    let fallback = verbosity_directive(verbosity).unwrap_or(config.level.as_str());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    // A second init (e.g. in tests) keeps the first subscriber.
    let _ = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
