//! Error handling for the compute-chain node
//!
//! Error kinds follow the node's failure domains: malformed requests are
//! rejected at the boundary, collaborator I/O failures abort a mining attempt,
//! and invariant violations are detected when committing a block.

use thiserror::Error;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the node
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request at the producer boundary
    #[error("Invalid input: {message}")]
    InputValidation { message: String },

    /// A chain or pool invariant would be broken by the operation
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    /// Content-addressed storage failures
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Program execution failures
    #[error("Execution error: {message}")]
    Execution { message: String },

    /// Block broadcast failures
    #[error("Broadcast error: {message}")]
    Broadcast { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cancellation of an async operation
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration loading errors
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an input validation error
    pub fn input_validation(message: impl Into<String>) -> Self {
        Self::InputValidation {
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    /// Create a broadcast error
    pub fn broadcast(message: impl Into<String>) -> Self {
        Self::Broadcast {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request()
                }
            }
            Error::Storage { .. } => true,
            Error::Broadcast { .. } => true,
            Error::Timeout { .. } => true,
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Whether the error came from a collaborator rather than the core
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Error::Storage { .. }
                | Error::Execution { .. }
                | Error::Broadcast { .. }
                | Error::Http(_)
                | Error::Timeout { .. }
                | Error::Io(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InputValidation { .. } => "input_validation",
            Error::InvariantViolation { .. } => "invariant_violation",
            Error::Storage { .. } => "storage",
            Error::Execution { .. } => "execution",
            Error::Broadcast { .. } => "broadcast",
            Error::Config { .. } => "config",
            Error::Cancelled { .. } => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::ConfigSource(_) => "config_source",
            Error::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::input_validation("Expected two hashes");
        assert_eq!(err.to_string(), "Invalid input: Expected two hashes");

        let err = Error::invariant("stale tip");
        assert_eq!(err.to_string(), "Invariant violation: stale tip");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::storage("ipfs unreachable").is_retryable());
        assert!(Error::timeout("publish").is_retryable());
        assert!(!Error::input_validation("bad").is_retryable());
        assert!(!Error::invariant("stale").is_retryable());
        assert!(!Error::cancelled("search").is_retryable());
    }

    #[test]
    fn test_collaborator_classification() {
        assert!(Error::execution("exit 1").is_collaborator_failure());
        assert!(Error::broadcast("no peers reachable").is_collaborator_failure());
        assert!(!Error::invariant("stale").is_collaborator_failure());
        assert!(!Error::config("batch size").is_collaborator_failure());
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.category(), "io");

        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
