//! Anti-hallucination configuration endpoints: inspect, tune, and reset
//! the thresholds the segmenter and filter run on.

use crate::handlers::{failure, success};
use crate::state::AppState;
use crate::transcription::engine::TuningUpdate;
use crate::transcription::filter::HALLUCINATION_PATTERNS;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_anti_hallucination_config(state: web::Data<AppState>) -> HttpResponse {
    let config = state.engine.snapshot_config();
    let tuning = &config.tuning;

    HttpResponse::Ok().json(json!({
        "status": "success",
        "config": {
            "temperature": tuning.temperature,
            "no_speech_threshold": tuning.no_speech_threshold,
            "confidence_threshold": tuning.confidence_threshold,
            "energy_threshold": tuning.energy_threshold,
            "silence_threshold": tuning.silence_threshold,
            "zcr_threshold": tuning.zcr_threshold,
            "compression_ratio_threshold": tuning.compression_ratio_threshold,
            "max_consecutive_failures": tuning.max_consecutive_failures,
        },
        "hallucination_patterns": HALLUCINATION_PATTERNS,
    }))
}

pub async fn update_anti_hallucination_config(
    state: web::Data<AppState>,
    request: web::Json<TuningUpdate>,
) -> HttpResponse {
    match state.engine.update_tuning(request.into_inner()).await {
        Ok(applied) if applied.is_empty() => success("No parameters were updated"),
        Ok(applied) => success(format!("Updated parameters: {}", applied.join(", "))),
        Err(e) => failure(&e),
    }
}

pub async fn reset_anti_hallucination_config(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.reset_tuning().await {
        Ok(()) => success("Anti-hallucination configuration reset to defaults"),
        Err(e) => failure(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    fn state() -> web::Data<AppState> {
        web::Data::new(AppState::new(AppConfig::default()))
    }

    #[actix_web::test]
    async fn test_get_config_reports_thresholds_and_patterns() {
        let app = test::init_service(App::new().app_data(state()).route(
            "/anti_hallucination_config",
            web::get().to(get_anti_hallucination_config),
        ))
        .await;

        let req = test::TestRequest::get()
            .uri("/anti_hallucination_config")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "success");
        assert_eq!(body["config"]["confidence_threshold"], 0.6);
        assert!(body["hallucination_patterns"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "thanks for watching"));
    }

    #[actix_web::test]
    async fn test_update_then_get_roundtrip() {
        let shared = state();
        let app = test::init_service(
            App::new()
                .app_data(shared.clone())
                .route(
                    "/update_anti_hallucination_config",
                    web::post().to(update_anti_hallucination_config),
                )
                .route(
                    "/anti_hallucination_config",
                    web::get().to(get_anti_hallucination_config),
                ),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/update_anti_hallucination_config")
            .set_json(json!({"confidence_threshold": 0.8}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");

        let req = test::TestRequest::get()
            .uri("/anti_hallucination_config")
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["config"]["confidence_threshold"], 0.8);
    }

    #[actix_web::test]
    async fn test_update_with_out_of_range_value_is_error_envelope() {
        let app = test::init_service(App::new().app_data(state()).route(
            "/update_anti_hallucination_config",
            web::post().to(update_anti_hallucination_config),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/update_anti_hallucination_config")
            .set_json(json!({"confidence_threshold": 1.5}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("confidence_threshold"));
    }
}
