//! Error types for the inflow connector.

use thiserror::Error;

/// Result type alias using inflow's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for inflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Upstream returned 429/5xx or the network flaked; retryable
    #[error("Transient upstream error: {0}")]
    TransientUpstream(String),

    /// Upstream rejected the request (4xx other than 429/404); not retryable
    #[error("Permanent upstream error: {0}")]
    PermanentUpstream(String),

    /// Upstream entity no longer exists (404); treated as deletion
    #[error("Gone: {0}")]
    Gone(String),

    /// Queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Handler could not interpret an envelope payload
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Webhook signature did not verify
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the dispatcher should retry the envelope that hit this error.
    ///
    /// Transient upstream failures, database hiccups, and I/O errors are
    /// worth another lease; everything else goes straight to `failed`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientUpstream(_) | Error::Database(_) | Error::Queue(_) | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::TransientUpstream(e.to_string())
        } else {
            Error::PermanentUpstream(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_transient() {
        let err = Error::TransientUpstream("503 from Teamwork".to_string());
        assert_eq!(err.to_string(), "Transient upstream error: 503 from Teamwork");
    }

    #[test]
    fn test_error_display_gone() {
        let err = Error::Gone("task 42".to_string());
        assert_eq!(err.to_string(), "Gone: task 42");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("TEAMWORK_API_KEY is required".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: TEAMWORK_API_KEY is required"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientUpstream("x".into()).is_transient());
        assert!(Error::Queue("x".into()).is_transient());
        assert!(Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "x")).is_transient());

        assert!(!Error::PermanentUpstream("x".into()).is_transient());
        assert!(!Error::Gone("x".into()).is_transient());
        assert!(!Error::MalformedPayload("x".into()).is_transient());
        assert!(!Error::Config("x".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
