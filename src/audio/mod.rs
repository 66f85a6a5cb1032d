//! Audio pipeline: microphone capture, speech segmentation, and the
//! bounded hand-off queue between capture and inference.

pub mod buffer;
pub mod capture;
pub mod segmenter;
