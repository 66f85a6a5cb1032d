//! HTTP request handlers for the control, configuration, and query
//! surfaces. Control operations follow the original UI contract: expected
//! lifecycle and validation failures come back as a 200 response with an
//! error envelope rather than a transport-level status.

pub mod config;
pub mod control;
pub mod query;

use crate::error::AppError;
use actix_web::HttpResponse;
use serde_json::json;

pub(crate) fn success(message: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": message.into(),
    }))
}

pub(crate) fn failure(err: &AppError) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "error",
        "message": err.to_string(),
    }))
}
