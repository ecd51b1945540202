//! Logging configuration and initialization.
//!
//! The subscriber filter comes from, in order:
//! - the RUST_LOG environment variable
//! - the `[logging]` section of rebind.toml
//! - the built-in default (info, pretty)

use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Accepted values of `logging.level`
pub const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Accepted values of `logging.format`
pub const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

/// Logging configuration from rebind.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format: pretty, compact, json
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl LogConfig {
    /// Creates a new LogConfig with default values.
    pub fn new() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter directive for a configured level. The level applies to this
/// crate; dependencies only report warnings and errors.
fn directive(level: &str) -> String {
    format!("warn,rebind={}", parse_level(level))
}

fn env_filter(config: Option<&LogConfig>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    match config {
        Some(cfg) => EnvFilter::new(directive(&cfg.level)),
        None => EnvFilter::new(directive("info")),
    }
}

/// Initializes the logging system.
///
/// Calling it more than once keeps the first subscriber.
pub fn init_logging(config: Option<&LogConfig>) {
    let filter = env_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    // Err means an earlier call already installed a subscriber
    let _ = match config.map(|c| c.format.as_str()).unwrap_or("pretty") {
        "json" => tracing::subscriber::set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE),
            ),
        ),
        "compact" => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().compact().with_target(false)),
        ),
        _ => tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().with_thread_names(true)),
        ),
    };
}

/// Parses a log level, falling back to INFO for unknown names.
fn parse_level(level: &str) -> Level {
    level.parse().unwrap_or(Level::INFO)
}
