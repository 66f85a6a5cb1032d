//! # Segment Queue
//!
//! Bounded hand-off buffer between the capture stage and the inference
//! stage. Capture keeps filling new segments while the previous segment is
//! still being transcribed; when inference falls behind and the queue is
//! full, the **oldest** pending segment is dropped so capture never blocks
//! and memory stays bounded. Bounded staleness beats unbounded growth for
//! a live transcript.

use crate::audio::segmenter::Segment;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

pub struct SegmentQueue {
    inner: Mutex<VecDeque<Segment>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl SegmentQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a segment, evicting the oldest pending one if full.
    pub fn push(&self, segment: Segment) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Inference behind capture, dropped oldest segment ({} total)", total);
        }
        queue.push_back(segment);
    }

    /// Dequeue the oldest pending segment.
    pub fn pop(&self) -> Option<Segment> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Segments evicted because inference could not keep up.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(marker: f32) -> Segment {
        Segment {
            samples: vec![marker; 4],
            mean_energy: marker,
            peak_energy: marker,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = SegmentQueue::new(4);
        queue.push(segment(1.0));
        queue.push(segment(2.0));

        assert_eq!(queue.pop().unwrap().mean_energy, 1.0);
        assert_eq!(queue.pop().unwrap().mean_energy, 2.0);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let queue = SegmentQueue::new(2);
        queue.push(segment(1.0));
        queue.push(segment(2.0));
        queue.push(segment(3.0));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(queue.pop().unwrap().mean_energy, 2.0);
        assert_eq!(queue.pop().unwrap().mean_energy, 3.0);
    }
}
