use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    Validation,
    Internal,
    Unknown,
}

impl ErrorCode {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 422 => Self::Validation,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

/// Error body returned by the service: `{"error": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code:?} ({status}): {message}")]
pub struct ApiException {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: ErrorCode::from_status(status),
            message: message.into(),
        }
    }

    /// Builds the exception from a raw error body, falling back to the body text
    /// when it is not the service's JSON error shape.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        let message = match serde_json::from_slice::<ApiError>(body) {
            Ok(api_error) => api_error.error,
            Err(_) => String::from_utf8_lossy(body).trim().to_string(),
        };
        Self::new(status, message)
    }
}

impl From<ApiException> for ApiError {
    fn from(value: ApiException) -> Self {
        Self {
            error: value.message,
        }
    }
}
