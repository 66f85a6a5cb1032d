//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Built-in defaults
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! Besides the usual server settings, this module owns the **engine tuning
//! surface**: the anti-hallucination thresholds that the segmenter, the
//! hallucination filter, and the Whisper invocation read on every segment.
//! The values here are the *startup defaults*; at runtime the engine keeps
//! its own mutable copy (see [`EngineConfig`]) which the config endpoints
//! update while the engine is idle.

use crate::error::{AppError, AppResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub audio: AudioConfig,
    pub engine: EngineTuning,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Whisper model and language selection.
///
/// `available_models` and `languages` are the allow-lists the control
/// endpoints validate against; switching to anything outside them is
/// rejected with `InvalidArgument`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_model: String,
    pub available_models: Vec<String>,
    pub default_language: String,
    pub languages: Vec<String>,
}

/// Audio capture and pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture sample rate in Hz (Whisper expects 16000)
    pub sample_rate: u32,

    /// Capture chunk duration in milliseconds (one segmenter decision per chunk)
    pub chunk_ms: u32,

    /// Maximum number of pending segments between capture and inference.
    /// When inference falls behind, the oldest pending segment is dropped.
    pub segment_queue_capacity: usize,

    /// Path the transcript file is written to on save
    pub output_file: String,
}

/// Anti-hallucination tuning thresholds.
///
/// These interact: energy and zero-crossing rate gate what the segmenter
/// even sends to the model, while confidence, no-speech probability and
/// compression ratio gate what the filter lets through afterwards. Each
/// signal alone is weak; the filter requires all of them to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineTuning {
    /// Minimum mean-squared amplitude for a chunk to count as speech (>= 0)
    pub energy_threshold: f32,

    /// Seconds of consecutive silence that close a segment (>= 0)
    pub silence_threshold: f32,

    /// Lower edge of the voice-plausible zero-crossing-rate band (>= 0)
    pub zcr_threshold: f32,

    /// Minimum `exp(avg_logprob)` for a transcription to be accepted (0..=1)
    pub confidence_threshold: f64,

    /// Sampling temperature passed to every Whisper invocation (0..=1)
    pub temperature: f64,

    /// Maximum model-reported no-speech probability (0..=1)
    pub no_speech_threshold: f64,

    /// Maximum text compression ratio before output counts as degenerate
    /// repetition (> 0)
    pub compression_ratio_threshold: f64,

    /// Consecutive inference failures before an `error` event is published
    /// to subscribers (>= 1); the engine keeps running either way
    pub max_consecutive_failures: u32,

    /// Hard cap on segment duration in seconds; a segment is forced out
    /// after this long even without a silence gap (> 0)
    pub max_segment_secs: f32,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            energy_threshold: 0.02,
            silence_threshold: 0.6,
            zcr_threshold: 0.1,
            confidence_threshold: 0.6,
            temperature: 0.0,
            no_speech_threshold: 0.6,
            compression_ratio_threshold: 2.4,
            max_consecutive_failures: 3,
            max_segment_secs: 8.0,
        }
    }
}

impl EngineTuning {
    /// Validate every threshold against its documented range.
    pub fn validate(&self) -> AppResult<()> {
        check_non_negative("energy_threshold", self.energy_threshold as f64)?;
        check_non_negative("silence_threshold", self.silence_threshold as f64)?;
        check_non_negative("zcr_threshold", self.zcr_threshold as f64)?;
        check_unit_interval("confidence_threshold", self.confidence_threshold)?;
        check_unit_interval("temperature", self.temperature)?;
        check_unit_interval("no_speech_threshold", self.no_speech_threshold)?;
        check_positive(
            "compression_ratio_threshold",
            self.compression_ratio_threshold,
        )?;
        if self.max_consecutive_failures == 0 {
            return Err(AppError::InvalidArgument(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        check_positive("max_segment_secs", self.max_segment_secs as f64)?;
        Ok(())
    }
}

/// The engine's runtime configuration: tuning thresholds plus the current
/// model and language selection. One instance exists process-wide, owned by
/// the engine and shared behind a lock; control endpoints mutate it only
/// while the engine is idle.
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub tuning: EngineTuning,
    pub model: String,
    pub language: String,
}

impl EngineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: config.engine.clone(),
            model: config.models.default_model.clone(),
            language: config.models.default_language.clone(),
        }
    }
}

/// Reject values outside `[0, 1]`.
pub fn check_unit_interval(name: &str, value: f64) -> AppResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, value
        )))
    }
}

/// Reject negative values.
pub fn check_non_negative(name: &str, value: f64) -> AppResult<()> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!(
            "{} must be greater than or equal to 0.0, got {}",
            name, value
        )))
    }
}

/// Reject zero or negative values.
pub fn check_positive(name: &str, value: f64) -> AppResult<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!(
            "{} must be greater than 0.0, got {}",
            name, value
        )))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            models: ModelsConfig {
                default_model: "base".to_string(),
                available_models: vec![
                    "tiny".to_string(),
                    "base".to_string(),
                    "small".to_string(),
                    "medium".to_string(),
                    "large".to_string(),
                ],
                default_language: "en".to_string(),
                languages: vec![
                    "en".to_string(),
                    "zh".to_string(),
                    "es".to_string(),
                    "fr".to_string(),
                    "de".to_string(),
                    "it".to_string(),
                    "pt".to_string(),
                    "ru".to_string(),
                    "ja".to_string(),
                    "ko".to_string(),
                ],
            },
            audio: AudioConfig {
                sample_rate: 16000,
                chunk_ms: 50,
                segment_queue_capacity: 8,
                output_file: "transcript_output.txt".to_string(),
            },
            engine: EngineTuning::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment
    /// variables, in that priority order.
    ///
    /// `HOST` and `PORT` are honored without the `APP_` prefix because
    /// deployment platforms commonly inject them that way.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense before the server
    /// starts. Catching these early beats failing on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate cannot be 0"));
        }

        if self.audio.chunk_ms == 0 {
            return Err(anyhow::anyhow!("Audio chunk duration cannot be 0"));
        }

        if self.audio.segment_queue_capacity == 0 {
            return Err(anyhow::anyhow!(
                "Segment queue capacity must be greater than 0"
            ));
        }

        if !self
            .models
            .available_models
            .contains(&self.models.default_model)
        {
            return Err(anyhow::anyhow!(
                "Default model '{}' is not in the available model list",
                self.models.default_model
            ));
        }

        if !self
            .models
            .languages
            .contains(&self.models.default_language)
        {
            return Err(anyhow::anyhow!(
                "Default language '{}' is not in the language list",
                self.models.default_language
            ));
        }

        self.engine
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        Ok(())
    }
}
