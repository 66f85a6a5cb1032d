//! Engine lifecycle and selection endpoints: start, stop, clear, save,
//! status, model/language switching, and display preferences.

use crate::handlers::{failure, success};
use crate::state::AppState;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct TimestampRequest {
    pub show_timestamp: bool,
}

#[derive(Debug, Deserialize)]
pub struct DisplayModeRequest {
    pub mode: String,
}

pub async fn start(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.start().await {
        Ok(()) => success("Transcription started"),
        Err(e) => failure(&e),
    }
}

pub async fn stop(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.stop().await {
        Ok(()) => success("Transcription stopped"),
        Err(e) => failure(&e),
    }
}

pub async fn status(state: web::Data<AppState>) -> HttpResponse {
    let config = state.engine.snapshot_config();
    HttpResponse::Ok().json(json!({
        "status": "success",
        "running": state.engine.is_running(),
        "model": config.model,
        "language": config.language,
    }))
}

pub async fn clear(state: web::Data<AppState>) -> HttpResponse {
    state.engine.store().clear();
    success("Transcript cleared")
}

/// Serialize the transcript and hand it back as a plain-text download.
/// An empty store yields a valid empty file, not an error.
pub async fn save(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.store().save() {
        Ok(saved) => {
            let filename = saved
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "transcript_output.txt".to_string());

            HttpResponse::Ok()
                .content_type("text/plain; charset=utf-8")
                .insert_header(ContentDisposition {
                    disposition: DispositionType::Attachment,
                    parameters: vec![DispositionParam::Filename(filename)],
                })
                .body(saved.contents)
        }
        Err(e) => failure(&e),
    }
}

pub async fn models(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "models": state.engine.allowed_models(),
        "current": state.engine.snapshot_config().model,
    }))
}

pub async fn change_model(
    state: web::Data<AppState>,
    request: web::Json<ModelRequest>,
) -> HttpResponse {
    match state.engine.set_model(&request.model).await {
        Ok(message) => success(message),
        Err(e) => failure(&e),
    }
}

pub async fn change_language(
    state: web::Data<AppState>,
    request: web::Json<LanguageRequest>,
) -> HttpResponse {
    match state.engine.set_language(&request.language).await {
        Ok(message) => success(message),
        Err(e) => failure(&e),
    }
}

pub async fn toggle_timestamp(
    state: web::Data<AppState>,
    request: web::Json<TimestampRequest>,
) -> HttpResponse {
    success(state.engine.set_show_timestamp(request.show_timestamp))
}

pub async fn change_display_mode(
    state: web::Data<AppState>,
    request: web::Json<DisplayModeRequest>,
) -> HttpResponse {
    match state.engine.set_display_mode(&request.mode) {
        Ok(message) => success(message),
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
    async fn test_status_reports_idle_defaults() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/status", web::get().to(status)),
        )
        .await;

        let req = test::TestRequest::get().uri("/status").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "success");
        assert_eq!(body["running"], false);
        assert_eq!(body["model"], "base");
        assert_eq!(body["language"], "en");
    }

    #[actix_web::test]
    async fn test_stop_when_idle_returns_error_envelope() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/stop", web::get().to(stop)),
        )
        .await;

        let req = test::TestRequest::get().uri("/stop").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "error");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("not running"));
    }

    #[actix_web::test]
    async fn test_change_language_envelope() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/change_language", web::post().to(change_language)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/change_language")
            .set_json(json!({"language": "fr"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");

        let req = test::TestRequest::post()
            .uri("/change_language")
            .set_json(json!({"language": "tlh"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "error");
    }

    #[actix_web::test]
    async fn test_models_lists_allow_list() {
        let app = test::init_service(
            App::new()
                .app_data(state())
                .route("/models", web::get().to(models)),
        )
        .await;

        let req = test::TestRequest::get().uri("/models").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["current"], "base");
        assert!(body["models"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m == "tiny"));
    }
}
