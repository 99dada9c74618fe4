use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::error::ModelError;
use crate::session::SessionError;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A data-access error.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// A session backend error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// The request's forgery-prevention token is missing or wrong.
    #[error("Forgery token mismatch")]
    ForgeryToken,

    /// The request could not be understood.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Builds the JSON error body shared by every error response.
pub fn error_body(message: &str) -> String {
    sonic_rs::to_string(&sonic_rs::json!({
        "error": message
    }))
    .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Model(ModelError::NoRecord) | AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Model(ref e) => {
                tracing::error!("Model error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Session(ref e) => {
                tracing::error!("Session error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::ForgeryToken => {
                tracing::warn!("❌ CSRF: token missing or mismatched");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::BadRequest(ref msg) => {
                tracing::debug!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, error_body(&message)).into_response()
    }
}
