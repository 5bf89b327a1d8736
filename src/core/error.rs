//! Unified error handling for rvmediator
//!
//! `ManagerError` covers failures returned to the embedding application,
//! `AdapterError` covers failures raised by third-party adapters, and
//! `ErrorCode` is the value handed to the listener when a load or show fails.

use std::fmt;

use thiserror::Error;

/// Errors returned by manager construction and configuration paths
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The network named an adapter type that is not registered
    #[error("Adapter not found: {0}")]
    AdapterNotFound(String),

    /// An adapter failed while being constructed or driven
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// File and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager's queue is closed
    #[error("Lifecycle manager is not running")]
    Stopped,
}

/// Result type alias for manager operations
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

/// Failures raised at the adapter boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The factory could not build an instance
    #[error("adapter construction failed: {0}")]
    Construction(String),

    /// The adapter returned an error from a synchronous call
    #[error("adapter runtime failure: {0}")]
    Runtime(String),

    /// The adapter panicked inside a synchronous call
    #[error("adapter panicked during {operation}: {message}")]
    Panicked { operation: String, message: String },
}

/// Error codes delivered to `RewardedVideoListener::on_load_failure`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The ad request timed out
    NetworkTimeout,
    /// The ad request failed at the transport level
    NetworkError,
    /// The ad server answered with an error status
    ServerError,
    /// No ad content is available
    NoFill,
    /// The adapter type could not be resolved or constructed
    AdapterConfiguration,
    /// `show` was called without a playable video
    VideoNotAvailable,
    /// The adapter's own failure, passed through verbatim
    AdapterRuntime(String),
    Unspecified,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::NetworkTimeout => write!(f, "NETWORK_TIMEOUT"),
            ErrorCode::NetworkError => write!(f, "NETWORK_ERROR"),
            ErrorCode::ServerError => write!(f, "SERVER_ERROR"),
            ErrorCode::NoFill => write!(f, "NETWORK_NO_FILL"),
            ErrorCode::AdapterConfiguration => write!(f, "ADAPTER_CONFIGURATION_ERROR"),
            ErrorCode::VideoNotAvailable => write!(f, "VIDEO_NOT_AVAILABLE"),
            ErrorCode::AdapterRuntime(code) => write!(f, "ADAPTER_RUNTIME_ERROR({code})"),
            ErrorCode::Unspecified => write!(f, "UNSPECIFIED"),
        }
    }
}

impl From<&AdapterError> for ErrorCode {
    fn from(err: &AdapterError) -> Self {
        ErrorCode::AdapterRuntime(err.to_string())
    }
}

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> ManagerResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> ManagerResult<T> {
        self.map_err(|e| ManagerError::Configuration(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ManagerError::Configuration("bad host".to_string());
        assert!(err.to_string().contains("Configuration error"));

        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ManagerError = io_error.into();
        assert!(matches!(err, ManagerError::Io(_)));
    }

    #[test]
    fn test_adapter_error_maps_to_runtime_code() {
        let err = AdapterError::Runtime("sdk not ready".to_string());
        let code = ErrorCode::from(&err);
        assert_eq!(
            code,
            ErrorCode::AdapterRuntime("adapter runtime failure: sdk not ready".to_string())
        );
    }

    #[test]
    fn test_with_context() {
        let result: Result<(), &str> = Err("missing field");
        let err = result.with_context("parse ad server").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: parse ad server: missing field"
        );
    }
}
