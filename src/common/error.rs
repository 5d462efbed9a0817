//! Error types for minilog

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes understood by the node protocol.
pub mod codes {
    pub const TIMEOUT: u64 = 0;
    pub const NOT_SUPPORTED: u64 = 10;
    pub const TEMPORARILY_UNAVAILABLE: u64 = 11;
    pub const MALFORMED_REQUEST: u64 = 12;
    pub const CRASH: u64 = 13;
    pub const ABORT: u64 = 14;
    pub const KEY_DOES_NOT_EXIST: u64 = 20;
    pub const KEY_ALREADY_EXISTS: u64 = 21;
    pub const PRECONDITION_FAILED: u64 = 22;
}

#[derive(Error, Debug)]
pub enum Error {
    // === Substrate Errors ===
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Compare-and-swap conflict on {0}")]
    CasConflict(String),

    #[error("Storage exhausted: gave up appending to {key} after {attempts} attempts")]
    StorageExhausted { key: String, attempts: u32 },

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Request Errors ===
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    // === Network Errors ===
    #[error("RPC error {code}: {text}")]
    Rpc { code: u64, text: String },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a transient substrate failure worth another attempt?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::CasConflict(_) | Error::Timeout(_) => true,
            Error::Rpc { code, .. } => matches!(
                *code,
                codes::TIMEOUT | codes::TEMPORARILY_UNAVAILABLE | codes::CRASH | codes::ABORT
            ),
            _ => false,
        }
    }

    /// Convert to a node protocol error code
    pub fn to_rpc_code(&self) -> u64 {
        match self {
            Error::NotFound(_) => codes::KEY_DOES_NOT_EXIST,
            Error::CasConflict(_) => codes::PRECONDITION_FAILED,
            Error::MalformedRequest(_) | Error::Json(_) => codes::MALFORMED_REQUEST,
            Error::NotSupported(_) => codes::NOT_SUPPORTED,
            Error::Timeout(_) => codes::TIMEOUT,
            Error::Rpc { code, .. } => *code,
            // A timed-out CAS may still have applied, so exhaustion is indefinite.
            Error::StorageExhausted { .. } => codes::CRASH,
            _ => codes::CRASH,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MalformedRequest(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::CasConflict(_) => StatusCode::CONFLICT,
            Error::NotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::StorageExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build an error from a protocol error reply
    pub fn from_rpc(code: u64, text: impl Into<String>) -> Self {
        Error::Rpc {
            code,
            text: text.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::CasConflict("k".into()).is_retryable());
        assert!(Error::Timeout("read".into()).is_retryable());
        assert!(Error::from_rpc(codes::TEMPORARILY_UNAVAILABLE, "busy").is_retryable());

        assert!(!Error::NotFound("k".into()).is_retryable());
        assert!(!Error::MalformedRequest("missing key".into()).is_retryable());
        assert!(!Error::from_rpc(codes::MALFORMED_REQUEST, "bad").is_retryable());
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(Error::NotFound("k".into()).to_rpc_code(), 20);
        assert_eq!(Error::CasConflict("k".into()).to_rpc_code(), 22);
        assert_eq!(Error::MalformedRequest("x".into()).to_rpc_code(), 12);
        assert_eq!(
            Error::StorageExhausted {
                key: "k".into(),
                attempts: 100
            }
            .to_rpc_code(),
            13
        );
        assert_eq!(Error::from_rpc(11, "busy").to_rpc_code(), 11);
    }

    #[test]
    fn test_http_status() {
        use axum::http::StatusCode;
        assert_eq!(
            Error::MalformedRequest("x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::StorageExhausted {
                key: "k".into(),
                attempts: 3
            }
            .to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
