//! # Real-time Speech Transcription Backend
//!
//! Actix-web server wrapping a single process-wide transcription engine:
//! microphone capture, speech segmentation, Whisper inference with
//! hallucination filtering, and fan-out of accepted transcripts to
//! WebSocket subscribers and polling REST clients.
//!
//! ## Application Architecture:
//! - **config**: TOML + environment configuration and engine tuning defaults
//! - **state**: Shared application state holding the engine and counters
//! - **audio**: Capture thread, segmenter, and the bounded segment queue
//! - **transcription**: Whisper model, hallucination filter, store, engine
//! - **publisher**: Event fan-out to real-time subscribers
//! - **websocket**: Per-connection subscriber actors
//! - **handlers**: Control, configuration, and query REST endpoints
//! - **middleware**: Request logging and request/error counting
//! - **error**: Error taxonomy and HTTP mappings

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod publisher;
mod state;
mod transcription;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the SIGINT/SIGTERM handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting whisper-stream-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        // The browser UI is served from elsewhere during development, so
        // CORS stays wide open.
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // Control surface
            .route("/start", web::get().to(handlers::control::start))
            .route("/stop", web::get().to(handlers::control::stop))
            .route("/status", web::get().to(handlers::control::status))
            .route("/clear", web::get().to(handlers::control::clear))
            .route("/save", web::get().to(handlers::control::save))
            .route("/models", web::get().to(handlers::control::models))
            .route(
                "/change_model",
                web::post().to(handlers::control::change_model),
            )
            .route(
                "/change_language",
                web::post().to(handlers::control::change_language),
            )
            .route(
                "/toggle_timestamp",
                web::post().to(handlers::control::toggle_timestamp),
            )
            .route(
                "/change_display_mode",
                web::post().to(handlers::control::change_display_mode),
            )
            // Anti-hallucination configuration
            .route(
                "/anti_hallucination_config",
                web::get().to(handlers::config::get_anti_hallucination_config),
            )
            .route(
                "/update_anti_hallucination_config",
                web::post().to(handlers::config::update_anti_hallucination_config),
            )
            .route(
                "/reset_anti_hallucination_config",
                web::post().to(handlers::config::reset_anti_hallucination_config),
            )
            // Query surface
            .route("/api/info", web::get().to(handlers::query::api_info))
            .route(
                "/api/transcripts",
                web::get().to(handlers::query::get_transcripts),
            )
            .route(
                "/api/latest",
                web::get().to(handlers::query::get_latest_transcript),
            )
            .route(
                "/api/transcripts/since/{timestamp}",
                web::get().to(handlers::query::get_transcripts_since),
            )
            // Real-time channel and health
            .route("/ws", web::get().to(websocket::event_stream))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");

            // Stop the engine first so the capture device is released
            // before the process exits.
            if app_state.engine.is_running() {
                if let Err(e) = app_state.engine.stop().await {
                    error!("Failed to stop engine during shutdown: {}", e);
                }
            }

            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Console logging via tracing. `RUST_LOG` overrides the default filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "whisper_stream_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag so the select in
/// `main` can run the graceful teardown path.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
