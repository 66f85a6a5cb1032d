//! # Error Handling
//!
//! Custom error types for the transcription service and their conversion to
//! HTTP responses.
//!
//! ## Error Categories:
//! - **InvalidState**: Operation not permitted in the current lifecycle state
//!   (e.g. changing the model while the engine is running)
//! - **InvalidArgument**: Out-of-range config values, unknown model/language
//! - **Device**: Audio capture device unavailable or failed to open
//! - **Model**: Whisper inference or model loading failure
//! - **Io**: Filesystem failure (e.g. saving the transcript file)
//! - **Internal**: Anything else that went wrong server-side
//!
//! Control endpoints report these as a `{status: "error", message}` JSON
//! envelope (see `handlers`). The `ResponseError` impl below covers the
//! remaining paths where an error propagates out of a handler directly.
//! Messages are human-readable summaries; internal error chains are logged,
//! never sent to clients.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Operation conflicts with the engine lifecycle state
    InvalidState(String),

    /// Caller supplied an invalid value
    InvalidArgument(String),

    /// Audio capture device problems
    Device(String),

    /// Model loading or inference failure
    Model(String),

    /// Filesystem failure
    Io(String),

    /// Unexpected server-side failure
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            AppError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            AppError::Device(msg) => write!(f, "Audio device error: {}", msg),
            AppError::Model(msg) => write!(f, "Model error: {}", msg),
            AppError::Io(msg) => write!(f, "I/O error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Maps each error category to an HTTP status code and a machine-readable
/// type tag, keeping the JSON shape consistent across endpoints:
///
/// ```json
/// {
///   "status": "error",
///   "error": "invalid_state",
///   "message": "Invalid state: stop transcription before changing the model"
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::InvalidState(_) => (actix_web::http::StatusCode::CONFLICT, "invalid_state"),
            AppError::InvalidArgument(_) => {
                (actix_web::http::StatusCode::BAD_REQUEST, "invalid_argument")
            }
            AppError::Device(_) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "device_error",
            ),
            AppError::Model(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "model_error",
            ),
            AppError::Io(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
            ),
            AppError::Internal(_) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
            ),
        };

        HttpResponse::build(status).json(json!({
            "status": "error",
            "error": error_type,
            "message": self.to_string(),
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidArgument(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
