//! Request-level error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codes that may appear in a synchronous acknowledgment.
///
/// Per-object failures (download, sign, upload, callback) are reported by the
/// agent to the caller's callback endpoints and never show up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    UnsupportedVersion,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to the caller in an error acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported protocolVersion: {0}")]
    UnsupportedVersion(String),
    #[error("{0}")]
    Internal(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::UnsupportedVersion(_) => ErrorCode::UnsupportedVersion,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Convenience result type for relay operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
