//! # Compute Device Selection
//!
//! Picks the device Whisper inference runs on. CUDA is preferred, then
//! Metal, then CPU. Detection happens once and is cached for the life of
//! the process.

use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info};

static BEST_DEVICE: OnceLock<Device> = OnceLock::new();

/// Best available device, detected once and cached.
pub fn best_device() -> Device {
    BEST_DEVICE.get_or_init(detect_best_device).clone()
}

fn detect_best_device() -> Device {
    match Device::new_cuda(0) {
        Ok(device) => {
            info!("Using CUDA GPU for inference");
            return device;
        }
        Err(e) => debug!("CUDA not available: {}", e),
    }

    match Device::new_metal(0) {
        Ok(device) => {
            info!("Using Metal GPU for inference");
            return device;
        }
        Err(e) => debug!("Metal not available: {}", e),
    }

    info!("Using CPU for inference (no GPU acceleration available)");
    Device::Cpu
}
