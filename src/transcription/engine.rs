//! # Transcription Engine
//!
//! The process-wide engine context: owns the runtime configuration, the
//! transcript store, the publisher hub, the model slot, and the lifecycle
//! of the capture→segment→infer→filter→publish pipeline. Request handlers
//! hold a shared reference and call the operations below; exactly one
//! engine exists per process.
//!
//! ## Lifecycle
//!
//! `Idle → Running → Idle`, driven by `start()`/`stop()`. Starting spawns
//! two stages: the capture thread (owns the cpal stream, feeds the segment
//! queue) and the inference task (pops segments, runs Whisper under
//! `spawn_blocking`, filters, stores, publishes). Stopping is cooperative:
//! both stages watch an atomic stop flag, the in-flight inference is
//! allowed to complete and its result is still processed, then the device
//! is released and the engine returns to idle.
//!
//! Control operations and config mutation are serialized by one async
//! mutex, and config mutation is refused while running, so the loop reads
//! a stable configuration.

use crate::audio::buffer::SegmentQueue;
use crate::audio::capture::{spawn_capture, CaptureSettings};
use crate::config::{
    check_non_negative, check_positive, check_unit_interval, AppConfig, AudioConfig,
    EngineConfig, EngineTuning,
};
use crate::device::best_device;
use crate::error::{AppError, AppResult};
use crate::publisher::{PublisherHub, SpeechEvent};
use crate::transcription::filter;
use crate::transcription::model::{ModelSize, WhisperModel};
use crate::transcription::store::{TranscriptEntry, TranscriptStore};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Display modes the browser UI can switch between.
pub const DISPLAY_MODES: &[&str] = &["segment", "continuous"];

/// Partial update of the anti-hallucination tuning. Fields are applied in
/// declaration order; the first out-of-range field aborts the request,
/// leaving already-applied fields in place and later fields unprocessed.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct TuningUpdate {
    pub confidence_threshold: Option<f64>,
    pub energy_threshold: Option<f32>,
    pub silence_threshold: Option<f32>,
    pub zcr_threshold: Option<f32>,
    pub temperature: Option<f64>,
    pub no_speech_threshold: Option<f64>,
    pub compression_ratio_threshold: Option<f64>,
    pub max_consecutive_failures: Option<u32>,
}

/// UI display preferences, acknowledged by the control surface and echoed
/// back on status queries. They do not influence the pipeline.
#[derive(Debug, Clone)]
pub struct DisplayPrefs {
    pub show_timestamp: bool,
    pub mode: String,
}

impl Default for DisplayPrefs {
    fn default() -> Self {
        Self {
            show_timestamp: true,
            mode: "segment".to_string(),
        }
    }
}

#[derive(Default)]
struct RunHandles {
    capture: Option<std::thread::JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

pub struct TranscriptionEngine {
    config: Arc<RwLock<EngineConfig>>,
    defaults: EngineTuning,
    allowed_models: Vec<String>,
    allowed_languages: Vec<String>,
    audio: AudioConfig,
    store: Arc<TranscriptStore>,
    hub: Arc<PublisherHub>,
    model: Arc<tokio::sync::RwLock<Option<WhisperModel>>>,
    running: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
    rejected: Arc<AtomicU64>,
    display: Mutex<DisplayPrefs>,
    /// Serializes start/stop and all config mutation
    control: tokio::sync::Mutex<RunHandles>,
}

impl TranscriptionEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(EngineConfig::from_app_config(config))),
            defaults: config.engine.clone(),
            allowed_models: config.models.available_models.clone(),
            allowed_languages: config.models.languages.clone(),
            audio: config.audio.clone(),
            store: Arc::new(TranscriptStore::new(&config.audio.output_file)),
            hub: Arc::new(PublisherHub::new()),
            model: Arc::new(tokio::sync::RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            rejected: Arc::new(AtomicU64::new(0)),
            display: Mutex::new(DisplayPrefs::default()),
            control: tokio::sync::Mutex::new(RunHandles::default()),
        }
    }

    /// Begin transcribing. Fails with `InvalidState` when already running
    /// and with `Device`/`Model` errors when the microphone or checkpoint
    /// cannot be opened; on every failure path the engine stays idle and
    /// holds no capture resource.
    pub async fn start(&self) -> AppResult<()> {
        let mut handles = self.control.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "transcription is already running".to_string(),
            ));
        }

        self.ensure_model_loaded().await?;

        self.stop_flag.store(false, Ordering::SeqCst);
        let queue = Arc::new(SegmentQueue::new(self.audio.segment_queue_capacity));
        let settings = CaptureSettings::new(self.audio.sample_rate, self.audio.chunk_ms);

        // spawn_capture blocks on the device-open handshake, so it runs on
        // the blocking pool rather than an actix worker.
        let capture = {
            let config = self.config.clone();
            let queue = queue.clone();
            let stop_flag = self.stop_flag.clone();
            tokio::task::spawn_blocking(move || {
                spawn_capture(settings, config, queue, stop_flag)
            })
            .await
            .map_err(|e| AppError::Internal(format!("capture spawn task failed: {}", e)))??
        };

        let worker = tokio::spawn(inference_loop(
            queue,
            self.config.clone(),
            self.model.clone(),
            self.store.clone(),
            self.hub.clone(),
            self.stop_flag.clone(),
            self.rejected.clone(),
        ));

        handles.capture = Some(capture);
        handles.worker = Some(worker);
        self.running.store(true, Ordering::SeqCst);
        self.hub.publish(self.status_event());

        info!("Transcription started");
        Ok(())
    }

    /// Stop transcribing. Fails with `InvalidState` when already idle.
    /// Returns once the inference task has exited and the capture thread
    /// has released the device.
    pub async fn stop(&self) -> AppResult<()> {
        let mut handles = self.control.lock().await;
        if !self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "transcription is not running".to_string(),
            ));
        }

        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(worker) = handles.worker.take() {
            if let Err(e) = worker.await {
                warn!("Inference task ended abnormally: {}", e);
            }
        }

        if let Some(capture) = handles.capture.take() {
            let joined = tokio::task::spawn_blocking(move || capture.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("Capture thread ended abnormally");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        self.hub.publish(self.status_event());

        info!("Transcription stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Load the configured model into the slot if it is not already there.
    async fn ensure_model_loaded(&self) -> AppResult<()> {
        let wanted = self.config.read().unwrap().model.clone();
        {
            let slot = self.model.read().await;
            if slot.as_ref().map(|m| m.name()) == Some(wanted.as_str()) {
                return Ok(());
            }
        }

        let size: ModelSize = wanted.parse()?;
        let loaded = WhisperModel::load(size, best_device()).await?;
        *self.model.write().await = Some(loaded);
        Ok(())
    }

    /// Switch the Whisper model. Only allowed while idle; the new model is
    /// loaded eagerly so the next start does not pay the download.
    pub async fn set_model(&self, name: &str) -> AppResult<String> {
        let _handles = self.control.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "stop transcription before changing the model".to_string(),
            ));
        }

        if !self.allowed_models.iter().any(|m| m == name) {
            return Err(AppError::InvalidArgument(format!(
                "unsupported model: {}",
                name
            )));
        }

        let size: ModelSize = name.parse()?;
        let loaded = WhisperModel::load(size, best_device()).await?;
        *self.model.write().await = Some(loaded);
        self.config.write().unwrap().model = name.to_string();

        Ok(format!("Switched to model: {}", name))
    }

    /// Switch the transcription language. Only allowed while idle.
    pub async fn set_language(&self, language: &str) -> AppResult<String> {
        let _handles = self.control.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "stop transcription before changing the language".to_string(),
            ));
        }

        if !self.allowed_languages.iter().any(|l| l == language) {
            return Err(AppError::InvalidArgument(format!(
                "unsupported language: {}",
                language
            )));
        }

        self.config.write().unwrap().language = language.to_string();
        Ok(format!("Language set to: {}", language))
    }

    /// Apply a partial tuning update. See [`TuningUpdate`] for the
    /// ordering and abort semantics. Returns the `name=value` pairs that
    /// were applied.
    pub async fn update_tuning(&self, update: TuningUpdate) -> AppResult<Vec<String>> {
        let _handles = self.control.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "stop transcription before adjusting parameters".to_string(),
            ));
        }

        let mut applied = Vec::new();

        if let Some(v) = update.confidence_threshold {
            check_unit_interval("confidence_threshold", v)?;
            self.config.write().unwrap().tuning.confidence_threshold = v;
            applied.push(format!("confidence_threshold={}", v));
        }

        if let Some(v) = update.energy_threshold {
            check_non_negative("energy_threshold", v as f64)?;
            self.config.write().unwrap().tuning.energy_threshold = v;
            applied.push(format!("energy_threshold={}", v));
        }

        if let Some(v) = update.silence_threshold {
            check_non_negative("silence_threshold", v as f64)?;
            self.config.write().unwrap().tuning.silence_threshold = v;
            applied.push(format!("silence_threshold={}", v));
        }

        if let Some(v) = update.zcr_threshold {
            check_non_negative("zcr_threshold", v as f64)?;
            self.config.write().unwrap().tuning.zcr_threshold = v;
            applied.push(format!("zcr_threshold={}", v));
        }

        if let Some(v) = update.temperature {
            check_unit_interval("temperature", v)?;
            self.config.write().unwrap().tuning.temperature = v;
            applied.push(format!("temperature={}", v));
        }

        if let Some(v) = update.no_speech_threshold {
            check_unit_interval("no_speech_threshold", v)?;
            self.config.write().unwrap().tuning.no_speech_threshold = v;
            applied.push(format!("no_speech_threshold={}", v));
        }

        if let Some(v) = update.compression_ratio_threshold {
            check_positive("compression_ratio_threshold", v)?;
            self.config.write().unwrap().tuning.compression_ratio_threshold = v;
            applied.push(format!("compression_ratio_threshold={}", v));
        }

        if let Some(v) = update.max_consecutive_failures {
            if v == 0 {
                return Err(AppError::InvalidArgument(
                    "max_consecutive_failures must be at least 1".to_string(),
                ));
            }
            self.config.write().unwrap().tuning.max_consecutive_failures = v;
            applied.push(format!("max_consecutive_failures={}", v));
        }

        Ok(applied)
    }

    /// Restore the startup tuning defaults. Only allowed while idle.
    pub async fn reset_tuning(&self) -> AppResult<()> {
        let _handles = self.control.lock().await;
        if self.running.load(Ordering::SeqCst) {
            return Err(AppError::InvalidState(
                "stop transcription before resetting parameters".to_string(),
            ));
        }

        self.config.write().unwrap().tuning = self.defaults.clone();
        Ok(())
    }

    pub fn set_show_timestamp(&self, show: bool) -> String {
        self.display.lock().unwrap().show_timestamp = show;
        format!("Timestamp display set to: {}", show)
    }

    pub fn set_display_mode(&self, mode: &str) -> AppResult<String> {
        if !DISPLAY_MODES.contains(&mode) {
            return Err(AppError::InvalidArgument(format!(
                "unsupported display mode: {}",
                mode
            )));
        }
        self.display.lock().unwrap().mode = mode.to_string();
        Ok(format!("Display mode set to: {}", mode))
    }

    pub fn display_prefs(&self) -> DisplayPrefs {
        self.display.lock().unwrap().clone()
    }

    pub fn snapshot_config(&self) -> EngineConfig {
        self.config.read().unwrap().clone()
    }

    pub fn status_event(&self) -> SpeechEvent {
        let config = self.config.read().unwrap();
        SpeechEvent::Status {
            running: self.running.load(Ordering::SeqCst),
            model: config.model.clone(),
            language: config.language.clone(),
        }
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<PublisherHub> {
        &self.hub
    }

    pub fn allowed_models(&self) -> &[String] {
        &self.allowed_models
    }

    /// Transcriptions dropped by the hallucination filter since startup.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// The inference stage: pops segments, decodes them, filters, stores, and
/// publishes. Exits when the stop flag is set; the check sits between
/// segments, so an in-flight decode always completes and its result is
/// still processed before the loop winds down.
async fn inference_loop(
    queue: Arc<SegmentQueue>,
    config: Arc<RwLock<EngineConfig>>,
    model: Arc<tokio::sync::RwLock<Option<WhisperModel>>>,
    store: Arc<TranscriptStore>,
    hub: Arc<PublisherHub>,
    stop: Arc<AtomicBool>,
    rejected: Arc<AtomicU64>,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let Some(segment) = queue.pop() else {
            tokio::time::sleep(Duration::from_millis(50)).await;
            continue;
        };

        let (language, tuning) = {
            let config = config.read().unwrap();
            (config.language.clone(), config.tuning.clone())
        };

        let mean_energy = segment.mean_energy;
        let samples = segment.samples;
        let model_slot = model.clone();
        let temperature = tuning.temperature;
        let no_speech_threshold = tuning.no_speech_threshold;

        let result = tokio::task::spawn_blocking(move || {
            let mut slot = model_slot.blocking_write();
            match slot.as_mut() {
                Some(model) => model.transcribe(&samples, &language, temperature, no_speech_threshold),
                None => Err(AppError::Model("no model loaded".to_string())),
            }
        })
        .await
        .unwrap_or_else(|e| Err(AppError::Internal(format!("inference task panicked: {}", e))));

        match result {
            Ok(outcome) => {
                consecutive_failures = 0;
                publish_or_drop(&outcome, mean_energy, &tuning, &store, &hub, &rejected);
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    "Inference failed ({} consecutive): {}",
                    consecutive_failures, e
                );

                // Escalate to subscribers but keep the engine running; a
                // failing model should not halt transcription of later
                // speech. The counter resets so the event fires once per
                // failure streak, not on every segment after it.
                if consecutive_failures >= tuning.max_consecutive_failures {
                    hub.publish(SpeechEvent::Error {
                        message: format!("transcription failing repeatedly: {}", e),
                    });
                    consecutive_failures = 0;
                }
            }
        }
    }

    debug!("Inference loop exited");
}

/// Route one decode outcome: accepted transcriptions become store entries
/// and `transcription` events; rejections are counted and dropped without
/// a trace on the wire.
fn publish_or_drop(
    outcome: &crate::transcription::model::DecodeOutcome,
    mean_energy: f32,
    tuning: &EngineTuning,
    store: &TranscriptStore,
    hub: &PublisherHub,
    rejected: &AtomicU64,
) -> bool {
    match filter::evaluate(outcome, mean_energy, tuning) {
        Ok(()) => {
            let entry = TranscriptEntry::now(outcome.text.trim().to_string(), outcome.confidence());
            info!(
                "Transcribed [{}] '{}' (confidence {:.2})",
                entry.timestamp, entry.text, entry.confidence
            );
            store.append(entry.clone());
            hub.publish(SpeechEvent::Transcription(entry));
            true
        }
        Err(reason) => {
            rejected.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped transcription ({}): '{}'", reason, outcome.text);
            false
        }
    }
}

#[cfg(test)]
impl TranscriptionEngine {
    /// Force the lifecycle flag for guard tests that must not touch real
    /// audio devices or model downloads.
    fn force_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn engine() -> TranscriptionEngine {
        TranscriptionEngine::new(&AppConfig::default())
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_invalid_state() {
        let engine = engine();
        let err = engine.stop().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_start_when_running_is_invalid_state() {
        let engine = engine();
        engine.force_running(true);
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_set_model_refused_while_running() {
        let engine = engine();
        engine.force_running(true);

        let err = engine.set_model("small").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(engine.snapshot_config().model, "base");
    }

    #[tokio::test]
    async fn test_set_language_validates_allow_list() {
        let engine = engine();

        let err = engine.set_language("tlh").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(engine.snapshot_config().language, "en");

        engine.set_language("de").await.unwrap();
        assert_eq!(engine.snapshot_config().language, "de");
    }

    #[tokio::test]
    async fn test_update_tuning_rejects_out_of_range() {
        let engine = engine();

        let err = engine
            .update_tuning(TuningUpdate {
                confidence_threshold: Some(1.5),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert_eq!(engine.snapshot_config().tuning.confidence_threshold, 0.6);
    }

    #[tokio::test]
    async fn test_update_tuning_applies_valid_fields() {
        let engine = engine();

        let applied = engine
            .update_tuning(TuningUpdate {
                confidence_threshold: Some(0.8),
                energy_threshold: Some(0.05),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(applied.len(), 2);
        let config = engine.snapshot_config();
        assert_eq!(config.tuning.confidence_threshold, 0.8);
        assert_eq!(config.tuning.energy_threshold, 0.05);
    }

    #[tokio::test]
    async fn test_update_tuning_partial_apply_stops_at_first_invalid() {
        let engine = engine();

        // confidence_threshold is processed before temperature, so it is
        // applied before the invalid temperature aborts the request
        let err = engine
            .update_tuning(TuningUpdate {
                confidence_threshold: Some(0.9),
                temperature: Some(3.0),
                no_speech_threshold: Some(0.2),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let config = engine.snapshot_config();
        assert_eq!(config.tuning.confidence_threshold, 0.9);
        assert_eq!(config.tuning.temperature, 0.0);
        assert_eq!(config.tuning.no_speech_threshold, 0.6);
    }

    #[tokio::test]
    async fn test_update_tuning_refused_while_running() {
        let engine = engine();
        engine.force_running(true);

        let err = engine
            .update_tuning(TuningUpdate {
                confidence_threshold: Some(0.9),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(engine.snapshot_config().tuning.confidence_threshold, 0.6);
    }

    #[tokio::test]
    async fn test_reset_tuning_restores_defaults() {
        let engine = engine();

        engine
            .update_tuning(TuningUpdate {
                confidence_threshold: Some(0.95),
                ..Default::default()
            })
            .await
            .unwrap();

        engine.reset_tuning().await.unwrap();
        assert_eq!(engine.snapshot_config().tuning, EngineTuning::default());
    }

    #[tokio::test]
    async fn test_display_prefs() {
        let engine = engine();

        assert!(engine.set_display_mode("continuous").is_ok());
        assert_eq!(engine.display_prefs().mode, "continuous");

        assert!(matches!(
            engine.set_display_mode("marquee"),
            Err(AppError::InvalidArgument(_))
        ));

        engine.set_show_timestamp(false);
        assert!(!engine.display_prefs().show_timestamp);
    }

    #[tokio::test]
    async fn test_hallucinated_outcome_leaves_store_and_wire_untouched() {
        use crate::transcription::model::DecodeOutcome;

        let engine = engine();
        let (_id, mut rx) = engine.hub().subscribe(engine.status_event());

        // Perfect-looking result, but the text is a known silence filler
        let outcome = DecodeOutcome {
            text: "Thanks for watching".to_string(),
            avg_logprob: (0.95f64).ln(),
            no_speech_prob: 0.1,
            compression_ratio: 1.0,
        };

        let accepted = publish_or_drop(
            &outcome,
            0.5,
            &engine.snapshot_config().tuning,
            engine.store(),
            engine.hub(),
            &engine.rejected,
        );

        assert!(!accepted);
        assert!(engine.store().is_empty());
        assert_eq!(engine.rejected_count(), 1);

        // Only the subscription status frame ever reached the wire
        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SpeechEvent::Status { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accepted_outcome_reaches_store_and_subscribers() {
        use crate::transcription::model::DecodeOutcome;

        let engine = engine();
        let (_id, mut rx) = engine.hub().subscribe(engine.status_event());
        let _ = rx.recv().await; // drain status

        let outcome = DecodeOutcome {
            text: "The quarterly numbers look good.".to_string(),
            avg_logprob: (0.9f64).ln(),
            no_speech_prob: 0.05,
            compression_ratio: 1.4,
        };

        let accepted = publish_or_drop(
            &outcome,
            0.5,
            &engine.snapshot_config().tuning,
            engine.store(),
            engine.hub(),
            &engine.rejected,
        );

        assert!(accepted);
        assert_eq!(engine.store().len(), 1);

        match rx.recv().await.unwrap() {
            SpeechEvent::Transcription(entry) => {
                assert_eq!(entry.text, "The quarterly numbers look good.");
                assert!((entry.confidence - 0.9).abs() < 1e-9);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_status_event_reflects_config() {
        let engine = engine();
        match engine.status_event() {
            SpeechEvent::Status {
                running,
                model,
                language,
            } => {
                assert!(!running);
                assert_eq!(model, "base");
                assert_eq!(language, "en");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
