//! # Application State
//!
//! Shared state handed to every HTTP request handler. The interesting part
//! is the [`TranscriptionEngine`]: there is exactly one per process, and
//! handlers reach all engine operations through this struct rather than
//! through globals.
//!
//! The `Arc<RwLock<T>>` pattern mirrors the rest of the service: many
//! concurrent readers, one writer at a time, cheap clones of the outer
//! struct so actix can hand a copy to each worker.

use crate::config::AppConfig;
use crate::transcription::engine::TranscriptionEngine;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Application configuration as loaded at startup
    pub config: Arc<RwLock<AppConfig>>,

    /// The process-wide transcription engine
    pub engine: Arc<TranscriptionEngine>,

    /// Request counters, updated by middleware on every request
    pub metrics: Arc<RwLock<ServiceMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Request counters surfaced by the health endpoint.
#[derive(Debug, Default, Clone)]
pub struct ServiceMetrics {
    pub request_count: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let engine = Arc::new(TranscriptionEngine::new(&config));
        Self {
            config: Arc::new(RwLock::new(config)),
            engine,
            metrics: Arc::new(RwLock::new(ServiceMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Copy of the startup configuration; cloning releases the lock
    /// immediately so readers never block each other for long.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn get_metrics_snapshot(&self) -> ServiceMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counters() {
        let state = AppState::new(AppConfig::default());

        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_count, 1);
    }

    #[test]
    fn test_engine_starts_idle() {
        let state = AppState::new(AppConfig::default());
        assert!(!state.engine.is_running());
    }
}
