//! Observability subsystem for tandem
//!
//! Structured logging through `tracing`. Lifecycle log lines carry an
//! `event` field from [`Event`]; everything else is ordinary leveled
//! logging with structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use tandem::observability::{init_logging, Event, LogFormat};
//!
//! init_logging("info", LogFormat::Compact)?;
//! tracing::info!(event = %Event::Serving, port = 4000, "directory ready");
//! ```

mod events;

pub use events::Event;

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Compact,
    /// JSON lines, one event per line
    Json,
}

impl FromStr for LogFormat {
    type Err = ObservabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" | "jsonl" => Ok(LogFormat::Json),
            other => Err(ObservabilityError::new(format!(
                "unknown log format '{}', expected 'compact' or 'json'",
                other
            ))),
        }
    }
}

/// Observability error
///
/// Logging setup failures are reported to the caller, who decides whether
/// the process can continue without logs.
#[derive(Debug)]
pub struct ObservabilityError {
    message: String,
}

impl ObservabilityError {
    /// Create a new observability error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TANDEM_OBSERVABILITY_FAILED: {}", self.message)
    }
}

impl std::error::Error for ObservabilityError {}

/// Result type for observability operations
pub type ObservabilityResult<T> = Result<T, ObservabilityError>;

/// Build the filter from the base level. `RUST_LOG`, when set, wins.
fn build_env_filter(level: &str) -> ObservabilityResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    parse_level(level)
}

fn parse_level(level: &str) -> ObservabilityResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| ObservabilityError::new(format!("invalid log level '{}': {}", level, e)))
}

/// Install the global tracing subscriber, writing to stderr.
///
/// Calling this twice is an error from the second call on; tests that want
/// log output should use [`init_test_logging`] instead.
pub fn init_logging(level: &str, format: LogFormat) -> ObservabilityResult<()> {
    let filter = build_env_filter(level)?;

    let result = match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init(),
    };

    result.map_err(|e| ObservabilityError::new(format!("logging already initialised: {}", e)))
}

/// Best-effort subscriber for tests; ignores "already initialised".
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
