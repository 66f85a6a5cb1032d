//! Read-only transcript query endpoints for polling REST clients, plus
//! the API self-description document.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_transcripts(state: web::Data<AppState>) -> HttpResponse {
    let transcripts = state.engine.store().snapshot();
    HttpResponse::Ok().json(json!({
        "status": "success",
        "count": transcripts.len(),
        "transcripts": transcripts,
    }))
}

pub async fn get_latest_transcript(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.store().latest() {
        Some(latest) => HttpResponse::Ok().json(json!({
            "status": "success",
            "transcript": latest,
        })),
        None => HttpResponse::Ok().json(json!({
            "status": "success",
            "transcript": null,
            "message": "No transcripts yet",
        })),
    }
}

/// Entries strictly after the given `HH:MM:SS` timestamp. The store
/// compares the zero-padded strings lexically, so clients can feed back
/// the timestamp of the last entry they saw.
pub async fn get_transcripts_since(
    state: web::Data<AppState>,
    timestamp: web::Path<String>,
) -> HttpResponse {
    let transcripts = state.engine.store().since(&timestamp);
    HttpResponse::Ok().json(json!({
        "status": "success",
        "count": transcripts.len(),
        "transcripts": transcripts,
    }))
}

pub async fn api_info(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    HttpResponse::Ok().json(json!({
        "status": "success",
        "service": "Real-time speech transcription API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "websocket": {
                "url": format!("ws://{}:{}/ws", config.server.host, config.server.port),
                "description": "Real-time push channel for transcription results",
                "events": {
                    "status": "Lifecycle and configuration snapshot",
                    "transcription": "One accepted transcript entry",
                    "error": "Inference trouble report",
                }
            },
            "rest": {
                "/api/info": "This document",
                "/api/transcripts": "All transcript entries",
                "/api/latest": "Most recent transcript entry",
                "/api/transcripts/since/{timestamp}": "Entries after an HH:MM:SS timestamp",
            },
            "control": {
                "/status": "Engine status",
                "/start": "Start transcription",
                "/stop": "Stop transcription",
                "/clear": "Clear the transcript",
                "/save": "Download the transcript as plain text",
                "/models": "Available models",
                "/change_model": "Switch Whisper model (idle only)",
                "/change_language": "Switch language (idle only)",
                "/anti_hallucination_config": "Current tuning thresholds",
                "/update_anti_hallucination_config": "Adjust tuning thresholds (idle only)",
                "/reset_anti_hallucination_config": "Restore default thresholds (idle only)",
            }
        }
    }))
}
