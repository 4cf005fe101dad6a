//! Structured logging setup.
//!
//! The library only emits `tracing` events; hosts that already install a
//! subscriber need nothing from here. The `oauth-realm` binary calls
//! [`init_logging_with_config`] with a [`LogConfig`] read from the
//! environment:
//!
//! | variable | values | default |
//! |----------|--------|---------|
//! | `OAUTH_REALM_LOG_LEVEL` | trace, debug, info, warn, error | `info` |
//! | `OAUTH_REALM_LOG_FORMAT` | json, pretty | `json` |
//! | `OAUTH_REALM_LOG_ASYNC` | true, false | `false` |
//! | `OAUTH_REALM_LOG_TARGET_FILTER` | comma separated directives | unset |
//! | `OAUTH_REALM_LOG_INCLUDE_LOCATION` | true, false | `false` |
//!
//! `RUST_LOG`, when set, replaces the level. Output goes to stderr.

use anyhow::{Context, Result};
use std::env;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// trace/debug/info/warn/error
    pub log_level: String,
    pub format: LogFormat,
    /// Write through a background thread
    pub async_logging: bool,
    /// Extra directives, e.g. `oauth_realm::verifier=debug,reqwest=warn`
    pub target_filter: Option<String>,
    /// Include file:line
    pub include_location: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
            async_logging: false,
            target_filter: None,
            include_location: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| var(key).and_then(|s| s.trim().parse().ok());
        let defaults = Self::default();
        Self {
            log_level: var("OAUTH_REALM_LOG_LEVEL").unwrap_or(defaults.log_level),
            format: var("OAUTH_REALM_LOG_FORMAT")
                .map(|s| LogFormat::parse(&s))
                .unwrap_or(defaults.format),
            async_logging: flag("OAUTH_REALM_LOG_ASYNC").unwrap_or(defaults.async_logging),
            target_filter: var("OAUTH_REALM_LOG_TARGET_FILTER"),
            include_location: flag("OAUTH_REALM_LOG_INCLUDE_LOCATION")
                .unwrap_or(defaults.include_location),
        }
    }

    fn level(&self) -> Level {
        match self.log_level.trim().to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level().as_str()));
        if let Some(targets) = &self.target_filter {
            for directive in targets.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                match directive.parse() {
                    Ok(directive) => filter = filter.add_directive(directive),
                    Err(_) => eprintln!("Warning: invalid log filter directive: {directive}"),
                }
            }
        }
        filter
    }
}

/// Install the global subscriber.
///
/// With `async_logging` the returned guard flushes pending events when
/// dropped; keep it alive for the life of the process.
pub fn init_logging_with_config(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = if config.async_logging {
        let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
        (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
    } else {
        (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr),
            None,
        )
    };

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(guard)
}
