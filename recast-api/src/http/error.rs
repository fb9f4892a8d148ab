// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

use recast_core::error::{Error, FieldError};

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code and optional structured detail.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Schema validation failure with the full offending-field list.
    #[must_use]
    pub fn validation_failed(fields: Vec<FieldError>) -> Self {
        let mut err = Self::bad_request(format!(
            "Validation failed for {} field{}",
            fields.len(),
            if fields.len() == 1 { "" } else { "s" }
        ));
        err.details = serde_json::to_value(fields).ok();
        err
    }

    #[must_use]
    pub fn rate_limited(retry_after: u64) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Too many requests. Please try again in {retry_after} seconds."),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for AppError {}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::ConfigInvalid { fields } => Self::validation_failed(fields),
            Error::NotFound(what) => Self::not_found(format!("{what} not found")),
            Error::AlreadyExists(what) => Self::conflict(format!("{what} already exists")),
            Error::DestinationDisabled(_) => Self::conflict(err.to_string()),
            Error::IngestRejected { .. } => Self::new(StatusCode::FORBIDDEN, err.to_string()),
            Error::TranscoderMissing
            | Error::PortUnavailable { .. }
            | Error::StateMismatch { .. }
            | Error::ChildExit { .. }
            | Error::Io(_)
            | Error::Yaml(_)
            | Error::Serialization(_)
            | Error::Internal(_) => Self::internal(err.to_string()),
        }
    }
}

/// Error response JSON structure: a one-line summary plus optional
/// structured detail (the validation field list).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_sensible_statuses() {
        let not_found: AppError = Error::NotFound("destination 'x'".into()).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let invalid: AppError = Error::ConfigInvalid {
            fields: vec![FieldError::new("ui.port", "must be non-zero")],
        }
        .into();
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert!(invalid.details.is_some());

        let disabled: AppError = Error::DestinationDisabled("a".into()).into();
        assert_eq!(disabled.status, StatusCode::CONFLICT);
    }
}
