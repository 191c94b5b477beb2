//! REST gateway errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use modbus_core::RangeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// ErrorInfo - response body
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// HTTP status code
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// ApiError
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    /// Address window outside a container
    #[error(transparent)]
    Range(#[from] RangeError),

    /// Malformed query string or body
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Range(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let status = self.status_code();
        let info = ErrorInfo::new(self.to_string()).with_code(status.as_u16());
        match self {
            ApiError::Range(e) => info.with_details(format!("container: {}", e.kind)),
            _ => info,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::debug!("API error: {}", self);
        (self.status_code(), Json(self.to_error_info())).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use modbus_core::ContainerKind;

    #[test]
    fn test_range_error_mapping() {
        let error = ApiError::from(RangeError {
            kind: ContainerKind::Coils,
            start: 8,
            end: 12,
            capacity: 10,
        });
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);

        let info = error.to_error_info();
        assert_eq!(info.code, 400);
        assert_eq!(
            info.message,
            "Requested coils 8...12 outside the valid range 0...10"
        );
        assert_eq!(info.details.as_deref(), Some("container: coils"));
    }

    #[test]
    fn test_error_info_serialization() {
        let info = ErrorInfo::new("boom").with_code(500);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!({"code": 500, "message": "boom"}));
    }

    #[test]
    fn test_bad_request() {
        let error = ApiError::BadRequest("missing field `data`".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.to_error_info().details, None);
    }
}
