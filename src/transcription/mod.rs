//! Transcription pipeline: the Whisper model wrapper, the hallucination
//! filter, the transcript store, and the engine that wires them to the
//! audio stages.

pub mod engine;
pub mod filter;
pub mod model;
pub mod store;
