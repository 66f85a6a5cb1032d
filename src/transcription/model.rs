//! # Whisper Model
//!
//! Loads Whisper checkpoints from HuggingFace via Candle and decodes audio
//! segments into text. Beyond the text itself, every decode reports the
//! three signals the hallucination filter feeds on:
//!
//! - **avg_logprob**: mean log-probability of the chosen tokens
//! - **no_speech_prob**: model-reported likelihood the segment carries no
//!   speech, read from the first decoder step
//! - **compression_ratio**: zlib ratio of the decoded text; looping output
//!   compresses suspiciously well
//!
//! Inference here is synchronous and CPU/GPU bound; the worker wraps calls
//! in `spawn_blocking` so the async runtime keeps serving requests.

use crate::error::{AppError, AppResult};
use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use std::io::Write;
use tokenizers::Tokenizer;
use tracing::{debug, info};

const MAX_DECODE_TOKENS: usize = 224;

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository for this size.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = AppError;

    fn from_str(s: &str) -> AppResult<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(AppError::InvalidArgument(format!(
                "unknown model size: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// The full result bundle of one decode.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub text: String,
    pub avg_logprob: f64,
    pub no_speech_prob: f64,
    pub compression_ratio: f64,
}

impl DecodeOutcome {
    /// Monotonic mapping of the average token log-probability into [0, 1].
    pub fn confidence(&self) -> f64 {
        self.avg_logprob.exp().clamp(0.0, 1.0)
    }
}

/// zlib compression ratio of the text; degenerate repetition drives this
/// well above the ~2.4 seen for natural language.
pub fn compression_ratio(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    if encoder.write_all(text.as_bytes()).is_err() {
        return 0.0;
    }
    match encoder.finish() {
        Ok(compressed) if !compressed.is_empty() => text.len() as f64 / compressed.len() as f64,
        _ => 0.0,
    }
}

/// A loaded Whisper model ready for decoding.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    name: String,
}

impl WhisperModel {
    /// Download (or reuse the local cache of) a checkpoint and load it onto
    /// the given device.
    pub async fn load(size: ModelSize, device: Device) -> AppResult<Self> {
        info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let api = {
            use hf_hub::api::tokio::ApiBuilder;

            let mut builder = ApiBuilder::new().with_progress(false);
            if let Ok(token) = std::env::var("HF_TOKEN") {
                builder = builder.with_token(Some(token));
            }
            if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
                builder = builder.with_cache_dir(cache_dir.into());
            }
            builder
                .build()
                .map_err(|e| AppError::Model(format!("HuggingFace API init failed: {}", e)))?
        };

        let repo = api.model(size.repo_name().to_string());

        let config_filename = repo
            .get("config.json")
            .await
            .map_err(|e| AppError::Model(format!("download config.json: {}", e)))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| AppError::Model(format!("download tokenizer.json: {}", e)))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .map_err(|e| AppError::Model(format!("download model weights: {}", e)))?;

        let config: Config = serde_json::from_reader(
            std::fs::File::open(config_filename).map_err(AppError::from)?,
        )
        .map_err(|e| AppError::Model(format!("parse model config: {}", e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| AppError::Model(format!("load tokenizer: {}", e)))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)
                .map_err(|e| AppError::Model(format!("map model weights: {}", e)))?
        };

        let model = m::model::Whisper::load(&vb, config.clone())
            .map_err(|e| AppError::Model(format!("initialize model: {}", e)))?;

        info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            name: size.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decode one audio segment.
    ///
    /// `no_speech_threshold` is enforced model-side: when the first decoder
    /// step already reports the segment as speechless, decoding is cut
    /// short and an empty outcome is returned (the filter defends against
    /// this again downstream).
    ///
    /// Audio must be mono f32 at 16 kHz. Decoding starts at the configured
    /// temperature and escalates by 0.2 when the output degenerates into
    /// repetition, up to 1.0.
    pub fn transcribe(
        &mut self,
        samples: &[f32],
        language: &str,
        temperature: f64,
        no_speech_threshold: f64,
    ) -> AppResult<DecodeOutcome> {
        if samples.is_empty() {
            return Err(AppError::Model("audio segment is empty".to_string()));
        }

        let mel = self
            .pcm_to_mel(samples)
            .map_err(|e| AppError::Model(format!("mel conversion: {}", e)))?;
        let mel = mel
            .unsqueeze(0)
            .map_err(|e| AppError::Model(format!("mel batching: {}", e)))?;

        let encoder_output = self
            .model
            .encoder
            .forward(&mel, false)
            .map_err(|e| AppError::Model(format!("encoder: {}", e)))?;

        let mut temp = temperature;
        loop {
            match self.decode_at(&encoder_output, language, temp, no_speech_threshold) {
                Ok(Some(outcome)) => {
                    debug!(
                        "Decoded {:.2}s segment at t={:.1}: '{}' (avg_logprob {:.3}, no_speech {:.3}, compression {:.2})",
                        samples.len() as f64 / 16000.0,
                        temp,
                        outcome.text,
                        outcome.avg_logprob,
                        outcome.no_speech_prob,
                        outcome.compression_ratio
                    );
                    return Ok(outcome);
                }
                // Repetitive decode; retry hotter
                Ok(None) if temp < 1.0 => {
                    temp = (temp + 0.2).min(1.0);
                    debug!("Repetitive decode, retrying at temperature {:.1}", temp);
                }
                // Out of temperature headroom; return a degenerate outcome
                // the filter is guaranteed to reject
                Ok(None) => {
                    return Ok(DecodeOutcome {
                        text: String::new(),
                        avg_logprob: f64::NEG_INFINITY,
                        no_speech_prob: 1.0,
                        compression_ratio: 0.0,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One greedy decode pass at a fixed temperature. Returns `Ok(None)`
    /// when the token stream degenerated into repetition.
    fn decode_at(
        &mut self,
        encoder_output: &Tensor,
        language: &str,
        temperature: f64,
        no_speech_threshold: f64,
    ) -> AppResult<Option<DecodeOutcome>> {
        let model_err = |e: candle_core::Error| AppError::Model(format!("decoder: {}", e));

        let mut tokens = self.initial_tokens(language);
        let prompt_len = tokens.len();
        let mut sum_logprob = 0.0f64;
        let mut chosen = 0usize;
        let mut no_speech_prob = 0.0f64;

        for step in 0..MAX_DECODE_TOKENS {
            let token_tensor = Tensor::new(&tokens[..], &self.device)
                .map_err(model_err)?
                .unsqueeze(0)
                .map_err(model_err)?;

            let logits = self
                .model
                .decoder
                .forward(&token_tensor, encoder_output, false)
                .map_err(model_err)?;

            if step == 0 {
                // The distribution at the start-of-transcript position
                // carries the model's no-speech estimate.
                let sot_logits = logits.i((0, 0, ..)).map_err(model_err)?;
                let probs = candle_nn::ops::softmax(&sot_logits, 0).map_err(model_err)?;
                no_speech_prob = probs
                    .i(self.no_speech_token() as usize)
                    .map_err(model_err)?
                    .to_scalar::<f32>()
                    .map_err(model_err)? as f64;

                if no_speech_prob > no_speech_threshold {
                    debug!(
                        "Segment judged speechless by the model ({:.3} > {:.3})",
                        no_speech_prob, no_speech_threshold
                    );
                    return Ok(Some(DecodeOutcome {
                        text: String::new(),
                        avg_logprob: f64::NEG_INFINITY,
                        no_speech_prob,
                        compression_ratio: 0.0,
                    }));
                }
            }

            let last_logits = logits.i((0, tokens.len() - 1, ..)).map_err(model_err)?;
            let last_logits = if temperature > 0.0 {
                (&last_logits / temperature).map_err(model_err)?
            } else {
                last_logits
            };

            let log_probs = candle_nn::ops::log_softmax(&last_logits, 0).map_err(model_err)?;
            let next_token = log_probs
                .argmax(0)
                .map_err(model_err)?
                .to_scalar::<u32>()
                .map_err(model_err)?;

            sum_logprob += log_probs
                .i(next_token as usize)
                .map_err(model_err)?
                .to_scalar::<f32>()
                .map_err(model_err)? as f64;
            chosen += 1;

            if next_token == self.eot_token() {
                break;
            }

            if is_repetitive(&tokens[prompt_len..], next_token) {
                return Ok(None);
            }

            tokens.push(next_token);
        }

        let output_tokens = &tokens[prompt_len..];
        let text = self.decode_tokens(output_tokens)?;
        let avg_logprob = if chosen > 0 {
            sum_logprob / chosen as f64
        } else {
            f64::NEG_INFINITY
        };

        Ok(Some(DecodeOutcome {
            compression_ratio: compression_ratio(&text),
            text,
            avg_logprob,
            no_speech_prob,
        }))
    }

    /// Convert a PCM segment to a padded log-mel spectrogram tensor.
    fn pcm_to_mel(&self, pcm_data: &[f32]) -> candle_core::Result<Tensor> {
        // Whisper operates on 30 second windows at 16 kHz
        let target_len = 30 * 16000;
        let mut padded = vec![0.0f32; target_len];
        let copy_len = pcm_data.len().min(target_len);
        padded[..copy_len].copy_from_slice(&pcm_data[..copy_len]);

        let n_mels = self.config.num_mel_bins as usize;
        let n_frames = 3000;
        let frame_size = padded.len() / n_frames;
        let mut mel_data = vec![0.0f32; n_mels * n_frames];

        for frame in 0..n_frames {
            let start = frame * frame_size;
            let end = (start + frame_size).min(padded.len());
            let frame_energy: f32 =
                padded[start..end].iter().map(|s| s.abs()).sum::<f32>() / frame_size as f32;

            for mel_bin in 0..n_mels {
                // -80 dB floor
                mel_data[mel_bin * n_frames + frame] = frame_energy.ln().max(-11.5129);
            }
        }

        Tensor::from_vec(mel_data, (n_mels, n_frames), &self.device)
    }

    fn initial_tokens(&self, language: &str) -> Vec<u32> {
        let mut tokens = vec![self.sot_token()];
        if let Some(lang_token) = self.language_token(language) {
            tokens.push(lang_token);
        }
        tokens.push(self.transcribe_token());
        tokens.push(self.no_timestamps_token());
        tokens
    }

    fn token_id(&self, token: &str, fallback: u32) -> u32 {
        self.tokenizer.token_to_id(token).unwrap_or(fallback)
    }

    fn sot_token(&self) -> u32 {
        self.token_id("<|startoftranscript|>", 50258)
    }

    fn eot_token(&self) -> u32 {
        self.token_id("<|endoftext|>", 50257)
    }

    fn transcribe_token(&self) -> u32 {
        self.token_id("<|transcribe|>", 50359)
    }

    fn no_timestamps_token(&self) -> u32 {
        self.token_id("<|notimestamps|>", 50363)
    }

    fn no_speech_token(&self) -> u32 {
        self.token_id("<|nospeech|>", 50362)
    }

    fn language_token(&self, language: &str) -> Option<u32> {
        self.tokenizer
            .token_to_id(&format!("<|{}|>", language.to_lowercase()))
    }

    fn decode_tokens(&self, tokens: &[u32]) -> AppResult<String> {
        let text = self
            .tokenizer
            .decode(tokens, true)
            .map_err(|e| AppError::Model(format!("tokenizer decode: {}", e)))?;
        Ok(text.trim().to_string())
    }
}

/// Detect immediate and short-cycle token repetition, the token-level
/// signature of a looping decode. The candidate token is considered as if
/// it had already been appended.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    let n = tokens.len();

    // Run of three identical tokens
    if n >= 2 && tokens[n - 1] == new_token && tokens[n - 2] == new_token {
        return true;
    }

    // Three-token cycle: ... a b c a b [c]
    if n >= 5
        && tokens[n - 2] == tokens[n - 5]
        && tokens[n - 1] == tokens[n - 4]
        && new_token == tokens[n - 3]
    {
        return true;
    }

    false
}
