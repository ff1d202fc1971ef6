//! Error types for Uptred core

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in Uptred core
#[derive(Debug, Error)]
pub enum UptredError {
    #[error("Connection error: {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("Timeout: {0}")]
    Timeout(&'static str),
}

impl UptredError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            UptredError::Connection { .. } | UptredError::Timeout(_) => true,
            UptredError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::TimedOut
            ),
            UptredError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<UptredError> for String {
    fn from(error: UptredError) -> Self {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(UptredError::Timeout("read").is_retryable());
        assert!(UptredError::Server { status: 503, message: String::new() }.is_retryable());
        assert!(!UptredError::Server { status: 404, message: String::new() }.is_retryable());
        assert!(!UptredError::Cancelled.is_retryable());
        assert!(UptredError::Io(std::io::ErrorKind::ConnectionReset.into()).is_retryable());
        assert!(!UptredError::Io(std::io::ErrorKind::NotFound.into()).is_retryable());
    }
}
