//! Health endpoint: service identity, uptime, request counters, and a
//! snapshot of the engine state including filter-rejection diagnostics.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let engine_config = state.engine.snapshot_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
        },
        "engine": {
            "running": state.engine.is_running(),
            "model": engine_config.model,
            "language": engine_config.language,
            "rejected_transcriptions": state.engine.rejected_count(),
            "subscribers": state.engine.hub().subscriber_count(),
            "display_mode": state.engine.display_prefs().mode,
            "show_timestamp": state.engine.display_prefs().show_timestamp,
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
        },
    }))
}
