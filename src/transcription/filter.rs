//! # Hallucination Filter
//!
//! Pure decision function applied to every raw transcription before it may
//! reach the store or the subscribers. Neural ASR models reliably invent
//! text over silence, music, and noise; the signature failure modes are
//! stock filler phrases, degenerate repetition, and confident-sounding
//! output for segments that carry no speech energy.
//!
//! Acceptance is the conjunction of six independent checks. Each signal on
//! its own is weak (confidence alone misses repetitive loops, pattern
//! matching alone misses novel hallucinations), so all of them must hold.

use crate::config::EngineTuning;
use crate::transcription::model::DecodeOutcome;
use std::fmt;

/// Stock phrases Whisper emits over silence and music. Matching is
/// case- and whitespace-insensitive but otherwise exact, so punctuated
/// variants are listed separately.
pub const HALLUCINATION_PATTERNS: &[&str] = &[
    "thanks for watching",
    "thanks for watching!",
    "thank you for watching",
    "thank you for watching!",
    "please subscribe",
    "like and subscribe",
    "don't forget to subscribe",
    "see you in the next video",
    "subtitles by the amara.org community",
    "www.mooji.org",
    "字幕由amara.org社区提供",
    "请不吝点赞 订阅 转发 打赏支持明镜与点点栏目",
    "谢谢观看",
    "感谢观看",
];

/// Why a transcription was dropped. Not surfaced to subscribers, only
/// logged and counted for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    EmptyText,
    LowConfidence,
    NoSpeech,
    RepetitiveOutput,
    KnownPattern,
    LowEnergy,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::EmptyText => "empty or punctuation-only text",
            Rejection::LowConfidence => "confidence below threshold",
            Rejection::NoSpeech => "no-speech probability above threshold",
            Rejection::RepetitiveOutput => "compression ratio above threshold",
            Rejection::KnownPattern => "matches known hallucination phrase",
            Rejection::LowEnergy => "segment energy below threshold",
        };
        write!(f, "{}", reason)
    }
}

/// Decide whether a decoded segment is real speech worth keeping.
///
/// `mean_energy` is the segment's mean chunk energy as measured by the
/// segmenter. The energy check repeats here even though the segmenter
/// already gates per-chunk: a segment can pass chunk classification yet
/// average low overall.
pub fn evaluate(
    outcome: &DecodeOutcome,
    mean_energy: f32,
    tuning: &EngineTuning,
) -> Result<(), Rejection> {
    let text = outcome.text.trim();
    if text.is_empty() || text.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
        return Err(Rejection::EmptyText);
    }

    if outcome.confidence() < tuning.confidence_threshold {
        return Err(Rejection::LowConfidence);
    }

    if outcome.no_speech_prob > tuning.no_speech_threshold {
        return Err(Rejection::NoSpeech);
    }

    if outcome.compression_ratio > tuning.compression_ratio_threshold {
        return Err(Rejection::RepetitiveOutput);
    }

    if is_known_hallucination(text) {
        return Err(Rejection::KnownPattern);
    }

    if mean_energy <= tuning.energy_threshold {
        return Err(Rejection::LowEnergy);
    }

    Ok(())
}

/// Case/whitespace-insensitive exact match against the pattern set.
pub fn is_known_hallucination(text: &str) -> bool {
    let normalized = normalize(text);
    HALLUCINATION_PATTERNS
        .iter()
        .any(|pattern| normalize(pattern) == normalized)
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(text: &str, confidence: f64, no_speech_prob: f64, compression_ratio: f64) -> DecodeOutcome {
        DecodeOutcome {
            text: text.to_string(),
            // confidence() is exp(avg_logprob), so invert the mapping here
            avg_logprob: confidence.ln(),
            no_speech_prob,
            compression_ratio,
        }
    }

    fn tuning() -> EngineTuning {
        EngineTuning::default()
    }

    #[test]
    fn test_clean_speech_is_accepted() {
        let out = outcome("The meeting starts at nine.", 0.95, 0.1, 1.3);
        assert!(evaluate(&out, 0.05, &tuning()).is_ok());
    }

    #[test]
    fn test_confidence_just_below_threshold_rejected() {
        let t = tuning();
        let out = outcome("Perfectly normal sentence.", t.confidence_threshold - 0.01, 0.0, 1.0);
        assert_eq!(
            evaluate(&out, 1.0, &t),
            Err(Rejection::LowConfidence)
        );
    }

    #[test]
    fn test_known_pattern_rejected_even_at_full_confidence() {
        let out = outcome("Thanks for watching", 1.0, 0.0, 1.0);
        assert_eq!(
            evaluate(&out, 1.0, &tuning()),
            Err(Rejection::KnownPattern)
        );

        // Case and internal whitespace are irrelevant
        let out = outcome("  THANKS   FOR WATCHING ", 1.0, 0.0, 1.0);
        assert_eq!(
            evaluate(&out, 1.0, &tuning()),
            Err(Rejection::KnownPattern)
        );
    }

    #[test]
    fn test_empty_and_punctuation_only_rejected() {
        assert_eq!(
            evaluate(&outcome("   ", 1.0, 0.0, 1.0), 1.0, &tuning()),
            Err(Rejection::EmptyText)
        );
        assert_eq!(
            evaluate(&outcome(". . !?", 1.0, 0.0, 1.0), 1.0, &tuning()),
            Err(Rejection::EmptyText)
        );
    }

    #[test]
    fn test_no_speech_probability_rejected() {
        let out = outcome("maybe words", 0.9, 0.8, 1.0);
        assert_eq!(evaluate(&out, 1.0, &tuning()), Err(Rejection::NoSpeech));
    }

    #[test]
    fn test_repetitive_output_rejected() {
        let out = outcome("la la la la la la la la", 0.9, 0.1, 3.5);
        assert_eq!(
            evaluate(&out, 1.0, &tuning()),
            Err(Rejection::RepetitiveOutput)
        );
    }

    #[test]
    fn test_low_segment_energy_rejected() {
        let t = tuning();
        let out = outcome("ghost of a sentence", 0.9, 0.1, 1.2);
        assert_eq!(
            evaluate(&out, t.energy_threshold / 2.0, &t),
            Err(Rejection::LowEnergy)
        );
    }

    #[test]
    fn test_novel_text_is_not_a_pattern_match() {
        assert!(!is_known_hallucination("thanks for listening to my talk"));
        assert!(is_known_hallucination("Thank you for watching!"));
    }
}
