//! # Microphone Capture
//!
//! Owns the cpal input stream on a dedicated OS thread. cpal streams are
//! not `Send`, so the stream is built, played, and dropped entirely on that
//! thread; the rest of the engine only sees the segments it pushes into the
//! shared [`SegmentQueue`] and the thread's join handle.
//!
//! The capture thread is the first pipeline stage: device callback →
//! fixed-size chunks → segmenter → segment queue. It reacts to the
//! engine's stop flag within one poll interval and releases the device by
//! dropping the stream on the way out.
//!
//! Opening the device can fail (no microphone, unsupported format). That
//! outcome is reported synchronously to the caller through a handshake
//! channel so `start()` can abort with a `Device` error while the engine
//! stays idle.

use crate::audio::buffer::SegmentQueue;
use crate::audio::segmenter::Segmenter;
use crate::config::EngineConfig;
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per chunk handed to the segmenter
    pub chunk_size: usize,
}

impl CaptureSettings {
    pub fn new(sample_rate: u32, chunk_ms: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
            chunk_size: (sample_rate as usize * chunk_ms as usize) / 1000,
        }
    }
}

/// Spawn the capture thread and wait for the device to open.
///
/// Returns once the stream is live (or failed to open). The thread runs
/// until `stop` is set, then drops the stream and exits; `join` the handle
/// to wait for the device release.
pub fn spawn_capture(
    settings: CaptureSettings,
    config: Arc<RwLock<EngineConfig>>,
    queue: Arc<SegmentQueue>,
    stop: Arc<AtomicBool>,
) -> AppResult<JoinHandle<()>> {
    let (ready_tx, ready_rx) = mpsc::channel::<AppResult<()>>();

    let handle = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>();

            let stream = match open_input_stream(&settings, chunk_tx) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AppError::Device(format!(
                    "failed to start input stream: {}",
                    e
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            info!(
                "Audio capture running ({} Hz, {} sample chunks)",
                settings.sample_rate, settings.chunk_size
            );

            let mut segmenter = Segmenter::new(settings.sample_rate);
            while !stop.load(Ordering::SeqCst) {
                match chunk_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(chunk) => {
                        let tuning = config.read().unwrap().tuning.clone();
                        if let Some(segment) = segmenter.push_chunk(&chunk, &tuning) {
                            debug!(
                                "Segment closed: {:.2}s, mean energy {:.4}, peak {:.4}",
                                segment.duration_secs(settings.sample_rate),
                                segment.mean_energy,
                                segment.peak_energy
                            );
                            queue.push(segment);
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        warn!("Capture callback channel closed unexpectedly");
                        break;
                    }
                }
            }

            // Dropping the stream closes the device.
            drop(stream);
            info!("Audio capture stopped, device released");
        })?;

    match ready_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(Ok(())) => Ok(handle),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => Err(AppError::Device(
            "timed out waiting for the capture stream to open".to_string(),
        )),
    }
}

/// Open the default input device with our mono stream config. The data
/// callback accumulates device buffers into fixed-size chunks and forwards
/// them to the segmenter loop.
fn open_input_stream(
    settings: &CaptureSettings,
    chunk_tx: mpsc::Sender<Vec<f32>>,
) -> AppResult<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| AppError::Device("no input device available".to_string()))?;

    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown".to_string());
    info!("Using input device: {}", device_name);

    let stream_config = StreamConfig {
        channels: settings.channels,
        sample_rate: SampleRate(settings.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut accumulator = ChunkAccumulator::new(settings.chunk_size);
    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                accumulator.push(data, |chunk| {
                    // A send failure means the segmenter loop is gone and
                    // the stream is about to be dropped anyway.
                    let _ = chunk_tx.send(chunk);
                });
            },
            move |err| {
                warn!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| {
            AppError::Device(format!(
                "failed to open input stream on '{}': {}",
                device_name, e
            ))
        })?;

    Ok(stream)
}

/// Regroups arbitrarily sized device buffers into fixed-size chunks.
struct ChunkAccumulator {
    buffer: Vec<f32>,
    chunk_size: usize,
}

impl ChunkAccumulator {
    fn new(chunk_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn push(&mut self, data: &[f32], mut emit: impl FnMut(Vec<f32>)) {
        for &sample in data {
            self.buffer.push(sample);
            if self.buffer.len() >= self.chunk_size {
                emit(std::mem::replace(
                    &mut self.buffer,
                    Vec::with_capacity(self.chunk_size),
                ));
            }
        }
    }
}
