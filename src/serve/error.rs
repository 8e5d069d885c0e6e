use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::RegistryError;

/// Handler-boundary error: a status code plus a short message, rendered as
/// a JSON-encoded string body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn in_progress() -> Self {
        Self::bad_request("Image is being uploaded, retry later")
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    pub(crate) fn message(&self) -> &str {
        &self.message
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::not_found(err.to_string()),
            RegistryError::Conflict(msg) => Self::conflict(msg),
            RegistryError::BadRequest(msg) => Self::bad_request(msg),
            RegistryError::InProgress => Self::in_progress(),
            RegistryError::Tar(_) => Self::bad_request("Layer format not supported"),
            RegistryError::Io(msg) => Self::internal(format!("Internal Error: {msg}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            log::warn!("request failed: {}", self.message());
        }
        let body = serde_json::to_string(&self.message).unwrap_or_default();
        (
            self.status,
            [("Content-Type", "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::in_progress().status(), StatusCode::BAD_REQUEST);
        assert!(ApiError::in_progress().message().contains("retry later"));
    }

    #[test]
    fn test_registry_error_translation() {
        let err: ApiError = RegistryError::Tar("bad magic".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "Layer format not supported");

        let err: ApiError = RegistryError::Io("disk".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
