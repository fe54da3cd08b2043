//! Runner configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

/// A variable was set to a value that does not parse.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

/// Runner configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `SYNCFLOW_LOG_JSON`: emit JSON log lines (default: `false`)
/// - `SYNCFLOW_CHUNKS`: number of chunks in the demo file (default: `8`)
/// - `SYNCFLOW_CHUNK_DELAY_MS`: latency before each chunk put (default: `50`)
/// - `SYNCFLOW_FAIL_CHUNK`: index of a chunk whose put is made to fail
/// - `SYNCFLOW_WAIT_TIMEOUT_MS`: how long to wait for the upload (default: `5000`)
/// - `SYNCFLOW_PRINT_METRICS`: print the Prometheus snapshot on exit (default: `false`)
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: String,
    pub log_json: bool,
    pub chunks: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    pub fail_chunk: Option<usize>,
    pub wait_timeout: Duration,
    pub print_metrics: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_json: parse(&lookup, "SYNCFLOW_LOG_JSON")?.unwrap_or(defaults.log_json),
            chunks: parse(&lookup, "SYNCFLOW_CHUNKS")?.unwrap_or(defaults.chunks),
            chunk_size: defaults.chunk_size,
            chunk_delay: parse(&lookup, "SYNCFLOW_CHUNK_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.chunk_delay),
            fail_chunk: parse(&lookup, "SYNCFLOW_FAIL_CHUNK")?,
            wait_timeout: parse(&lookup, "SYNCFLOW_WAIT_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.wait_timeout),
            print_metrics: parse(&lookup, "SYNCFLOW_PRINT_METRICS")?
                .unwrap_or(defaults.print_metrics),
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            chunks: 8,
            chunk_size: 1024,
            chunk_delay: Duration::from_millis(50),
            fail_chunk: None,
            wait_timeout: Duration::from_millis(5000),
            print_metrics: false,
        }
    }
}
