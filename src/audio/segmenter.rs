//! # Speech Segmenter
//!
//! Turns the continuous capture stream into discrete candidate utterances.
//! Each fixed-size chunk is classified as active or silent from two
//! short-time features:
//!
//! - **energy**: mean squared amplitude of the chunk
//! - **zero-crossing rate**: fraction of sign changes between consecutive
//!   samples
//!
//! A chunk counts as active when its energy clears `energy_threshold` AND
//! its ZCR falls in the voice-plausible band (low-frequency hum sits below
//! the configured floor, broadband hiss above the fixed ceiling). Active
//! chunks accumulate into the current segment buffer; once consecutive
//! silence exceeds `silence_threshold` seconds the segment closes and is
//! emitted together with its energy statistics. A hard duration cap forces
//! emission even without a silence gap so inference latency and memory
//! stay bounded.
//!
//! Purely a transform over sample buffers; no error conditions.

use crate::config::EngineTuning;

/// ZCR above this is broadband noise, not voice.
const ZCR_VOICE_CEILING: f32 = 0.5;

/// A contiguous span of speech audio bounded by silence, the unit of
/// inference.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Mono f32 samples at the capture sample rate
    pub samples: Vec<f32>,

    /// Mean of the per-chunk energies that built this segment
    pub mean_energy: f32,

    /// Loudest chunk energy in this segment
    pub peak_energy: f32,
}

impl Segment {
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        self.samples.len() as f32 / sample_rate as f32
    }
}

pub struct Segmenter {
    sample_rate: u32,
    buffer: Vec<f32>,
    chunk_energies: Vec<f32>,
    silence_run_secs: f32,
}

impl Segmenter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffer: Vec::new(),
            chunk_energies: Vec::new(),
            silence_run_secs: 0.0,
        }
    }

    /// Feed one capture chunk. Returns a closed segment when the silence
    /// gap or the duration cap is reached, otherwise `None`.
    ///
    /// Thresholds are read fresh on every call; they only change while the
    /// engine is idle, but the segmenter does not assume that.
    pub fn push_chunk(&mut self, chunk: &[f32], tuning: &EngineTuning) -> Option<Segment> {
        if chunk.is_empty() {
            return None;
        }

        let chunk_secs = chunk.len() as f32 / self.sample_rate as f32;
        let energy = chunk_energy(chunk);
        let zcr = zero_crossing_rate(chunk);

        let active = energy >= tuning.energy_threshold
            && zcr >= tuning.zcr_threshold
            && zcr <= ZCR_VOICE_CEILING;

        if active {
            self.silence_run_secs = 0.0;
            self.buffer.extend_from_slice(chunk);
            self.chunk_energies.push(energy);

            let max_samples = (tuning.max_segment_secs * self.sample_rate as f32) as usize;
            if self.buffer.len() >= max_samples {
                return self.close_segment();
            }
        } else if !self.buffer.is_empty() {
            self.silence_run_secs += chunk_secs;
            if self.silence_run_secs > tuning.silence_threshold {
                return self.close_segment();
            }
        }
        // Silence with an empty buffer is discarded outright; nothing ever
        // reaches inference for it.

        None
    }

    fn close_segment(&mut self) -> Option<Segment> {
        self.silence_run_secs = 0.0;
        if self.buffer.is_empty() {
            return None;
        }

        let samples = std::mem::take(&mut self.buffer);
        let energies = std::mem::take(&mut self.chunk_energies);
        let mean_energy = energies.iter().sum::<f32>() / energies.len() as f32;
        let peak_energy = energies.iter().cloned().fold(0.0f32, f32::max);

        Some(Segment {
            samples,
            mean_energy,
            peak_energy,
        })
    }
}

/// Mean squared amplitude.
pub fn chunk_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32
}

/// Fraction of sign changes between consecutive samples.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 16000;
    const CHUNK: usize = 800; // 50ms

    fn tuning() -> EngineTuning {
        EngineTuning::default()
    }

    /// A loud chunk alternating sign every few samples so that both energy
    /// and ZCR land inside the voice band.
    fn speech_chunk() -> Vec<f32> {
        (0..CHUNK)
            .map(|i| if (i / 4) % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    fn silent_chunk() -> Vec<f32> {
        vec![0.0; CHUNK]
    }

    #[test]
    fn test_pure_silence_never_emits() {
        let mut seg = Segmenter::new(SAMPLE_RATE);
        let t = tuning();

        // Two seconds of silence
        for _ in 0..40 {
            assert!(seg.push_chunk(&silent_chunk(), &t).is_none());
        }
    }

    #[test]
    fn test_speech_then_silence_emits_one_segment() {
        let mut seg = Segmenter::new(SAMPLE_RATE);
        let t = tuning();

        for _ in 0..10 {
            assert!(seg.push_chunk(&speech_chunk(), &t).is_none());
        }

        // Silence accumulates until the gap passes silence_threshold
        let mut emitted = None;
        for _ in 0..20 {
            if let Some(s) = seg.push_chunk(&silent_chunk(), &t) {
                emitted = Some(s);
                break;
            }
        }

        let segment = emitted.expect("segment should close after the silence gap");
        assert_eq!(segment.samples.len(), 10 * CHUNK);
        assert!(segment.mean_energy >= t.energy_threshold);
        assert!(segment.peak_energy >= segment.mean_energy);
    }

    #[test]
    fn test_duration_cap_forces_emission_without_silence() {
        let mut seg = Segmenter::new(SAMPLE_RATE);
        let t = tuning();
        let chunks_to_cap = (t.max_segment_secs / 0.05).ceil() as usize;

        let mut emitted = None;
        for _ in 0..chunks_to_cap + 1 {
            if let Some(s) = seg.push_chunk(&speech_chunk(), &t) {
                emitted = Some(s);
                break;
            }
        }

        let segment = emitted.expect("duration cap should force a segment");
        assert!(segment.duration_secs(SAMPLE_RATE) >= t.max_segment_secs - 0.1);
    }

    #[test]
    fn test_short_pause_does_not_split_segment() {
        let mut seg = Segmenter::new(SAMPLE_RATE);
        let t = tuning();

        for _ in 0..5 {
            assert!(seg.push_chunk(&speech_chunk(), &t).is_none());
        }
        // 100ms pause, well under the default 0.6s gap
        assert!(seg.push_chunk(&silent_chunk(), &t).is_none());
        assert!(seg.push_chunk(&silent_chunk(), &t).is_none());
        for _ in 0..5 {
            assert!(seg.push_chunk(&speech_chunk(), &t).is_none());
        }

        let mut emitted = None;
        for _ in 0..20 {
            if let Some(s) = seg.push_chunk(&silent_chunk(), &t) {
                emitted = Some(s);
                break;
            }
        }

        // Both bursts land in the same segment
        assert_eq!(emitted.unwrap().samples.len(), 10 * CHUNK);
    }

    #[test]
    fn test_high_zcr_noise_is_not_active() {
        let mut seg = Segmenter::new(SAMPLE_RATE);
        let t = tuning();

        // Loud but alternating sign on every sample: ZCR ~= 1.0
        let hiss: Vec<f32> = (0..CHUNK)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();

        for _ in 0..40 {
            assert!(seg.push_chunk(&hiss, &t).is_none());
        }
    }

    #[test]
    fn test_feature_helpers() {
        assert_eq!(chunk_energy(&[]), 0.0);
        assert!((chunk_energy(&[0.5, -0.5]) - 0.25).abs() < 1e-6);

        assert_eq!(zero_crossing_rate(&[0.5]), 0.0);
        assert!((zero_crossing_rate(&[0.5, -0.5, 0.5]) - 1.0).abs() < 1e-6);
        assert_eq!(zero_crossing_rate(&[0.5, 0.6, 0.7]), 0.0);
    }
}
