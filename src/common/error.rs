//! Error types for nomad
//!
//! Protocol rejections (DEAD, BAD, UNACCEPTABLE) are not errors: they travel
//! back to the client as `AcceptRejectResponse` values. An `Error` means the
//! request was not processed at all.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Storage Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Change not found: {0}")]
    ChangeNotFound(String),

    // === Change application ===
    #[error("Change application failed: {0}")]
    Apply(String),

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Server stopped: {0}")]
    ServerStopped(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Did the request fail to reach the endpoint, or its answer fail to come back?
    ///
    /// A transport failure never tells the client whether the server acted on
    /// the message, which is what makes commit/rollback outcomes ambiguous.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed(_) | Error::Timeout(_) | Error::Http(_) | Error::ServerStopped(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::ChangeNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidConfig(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::ServerStopped(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Apply(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_classification() {
        assert!(Error::Timeout("prepare".into()).is_transport_failure());
        assert!(Error::ConnectionFailed("refused".into()).is_transport_failure());
        assert!(!Error::Apply("boom".into()).is_transport_failure());
        assert!(!Error::Corrupted("bad frame".into()).is_transport_failure());
    }

    #[test]
    fn test_http_status_mapping() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::ChangeNotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Apply("x".into()).to_http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
