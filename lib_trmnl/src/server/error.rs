use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::error::TrmnlError;

/// # Application Error
///
/// HTTP-facing wrapper around `TrmnlError`.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AppError(#[from] pub TrmnlError);

impl AppError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TrmnlError::InvalidContentType(_) | TrmnlError::InvalidScreenId(_) => {
                StatusCode::BAD_REQUEST
            }
            TrmnlError::NotFound(_) => StatusCode::NOT_FOUND,
            TrmnlError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Converts an `AppError` into a status code plus a JSON error body.
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, message) = match &self.0 {
            TrmnlError::InvalidContentType(_) => {
                ("InvalidContentType", "Content-Type must be image/*")
            }
            TrmnlError::InvalidScreenId(_) => (
                "InvalidScreenId",
                "Screen id must be non-empty and contain no path separators.",
            ),
            TrmnlError::NotFound(_) => ("NotFound", "No stored image for this screen."),
            TrmnlError::Io(_) => ("InternalError", "Failed to access image storage."),
        };

        if status.is_server_error() {
            error!("{}: {}", error_type, self.0);
        } else {
            warn!("{}: {}", error_type, self.0);
        }

        (
            status,
            Json(json!({
                "error_type": error_type,
                "message": message,
                "detail": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
