//! CLI-specific error types
//!
//! Every CLI error ends the process with a non-zero exit status.

use std::fmt;
use std::io;

use crate::client::ClientError;
use crate::directory::DirectoryError;
use crate::observability::ObservabilityError;
use crate::server::NodeError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Bad flags or configuration
    ConfigError,
    /// I/O error (stdin/stdout)
    IoError,
    /// Logging could not be set up
    LoggingFailed,
    /// Startup failed
    BootFailed,
    /// Server node stopped on a fatal condition
    NodeTerminated,
    /// Client session could not continue
    ClientAborted,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "TANDEM_CLI_CONFIG_ERROR",
            Self::IoError => "TANDEM_CLI_IO_ERROR",
            Self::LoggingFailed => "TANDEM_CLI_LOGGING_FAILED",
            Self::BootFailed => "TANDEM_CLI_BOOT_FAILED",
            Self::NodeTerminated => "TANDEM_CLI_NODE_TERMINATED",
            Self::ClientAborted => "TANDEM_CLI_CLIENT_ABORTED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    /// Boot failed
    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<ObservabilityError> for CliError {
    fn from(e: ObservabilityError) -> Self {
        Self::new(CliErrorCode::LoggingFailed, e.message())
    }
}

impl From<DirectoryError> for CliError {
    fn from(e: DirectoryError) -> Self {
        match e {
            DirectoryError::InvalidConfig(_) => Self::config_error(e.to_string()),
            other => Self::boot_failed(other.to_string()),
        }
    }
}

impl From<NodeError> for CliError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::InvalidConfig(_) => Self::config_error(e.to_string()),
            NodeError::Bind { .. } => Self::boot_failed(e.to_string()),
            other => Self::new(CliErrorCode::NodeTerminated, other.to_string()),
        }
    }
}

impl From<ClientError> for CliError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::InvalidConfig(_) => Self::config_error(e.to_string()),
            other => Self::new(CliErrorCode::ClientAborted, other.to_string()),
        }
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::config_error("bad flag");
        assert_eq!(err.to_string(), "TANDEM_CLI_CONFIG_ERROR: bad flag");
    }

    #[test]
    fn test_node_errors_map_to_codes() {
        let config: CliError = NodeError::InvalidConfig("x".into()).into();
        assert_eq!(config.code(), CliErrorCode::ConfigError);

        let fatal: CliError = NodeError::TaskEnded("x".into()).into();
        assert_eq!(fatal.code_str(), "TANDEM_CLI_NODE_TERMINATED");
    }

    #[test]
    fn test_client_errors_map_to_codes() {
        let err: CliError = ClientError::PrimaryUnavailable("127.0.0.1:5001".into()).into();
        assert_eq!(err.code(), CliErrorCode::ClientAborted);
    }
}
