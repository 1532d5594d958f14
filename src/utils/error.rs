//! Error types and handling
//!
//! Common error types used across the node. Every core component returns
//! `AppResult`; only the RPC dispatch boundary turns an error into a wire
//! envelope.

use crate::device::DeviceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("No method named '{method}' on {object}")]
    UnknownMethod { object: String, method: String },

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("No free filename after {0} attempts")]
    FilenameExhausted(u32),

    #[error("Timestamp unavailable after {0} attempts")]
    TimestampUnavailable(u32),

    #[error("Scheduler faulted: {0}")]
    Faulted(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Name [{0}] already registered")]
    DuplicateName(String),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("{message}")]
    Remote { code: ErrorCode, message: String },
}

/// Coarse error classes shared by local errors and errors relayed from
/// isolated workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Conflict,
    DeviceError,
    ResourceExhausted,
    Faulted,
    ProxyError,
    Internal,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        AppError::BadRequest(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::UnknownMethod { .. } | AppError::Serialization(_) => {
                ErrorCode::BadRequest
            }
            AppError::AlreadyRecording | AppError::NotRecording | AppError::Busy(_) => ErrorCode::Conflict,
            AppError::Device(_) => ErrorCode::DeviceError,
            AppError::FilenameExhausted(_) | AppError::TimestampUnavailable(_) => {
                ErrorCode::ResourceExhausted
            }
            AppError::Faulted(_) => ErrorCode::Faulted,
            AppError::Proxy(_) => ErrorCode::ProxyError,
            AppError::Remote { code, .. } => *code,
            AppError::Io(_) | AppError::DuplicateName(_) | AppError::Command(_) => ErrorCode::Internal,
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_taxonomy() {
        assert_eq!(AppError::bad_request("x").code(), ErrorCode::BadRequest);
        assert_eq!(AppError::AlreadyRecording.code(), ErrorCode::Conflict);
        assert_eq!(AppError::FilenameExhausted(100).code(), ErrorCode::ResourceExhausted);
        assert_eq!(
            AppError::Device(DeviceError::new("lens cap")).code(),
            ErrorCode::DeviceError
        );
    }
}
