//! Acquisition counters shared between the worker and its owner

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AcquisitionStats {
    pub lines_read: AtomicU64,
    pub frames_accepted: AtomicU64,
    pub frames_malformed: AtomicU64,
    pub samples_appended: AtomicU64,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_line(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self, samples: usize) {
        self.frames_accepted.fetch_add(1, Ordering::Relaxed);
        self.samples_appended.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_lines(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn get_frames(&self) -> u64 {
        self.frames_accepted.load(Ordering::Relaxed)
    }

    pub fn get_malformed(&self) -> u64 {
        self.frames_malformed.load(Ordering::Relaxed)
    }

    pub fn get_samples(&self) -> u64 {
        self.samples_appended.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> String {
        format!(
            "lines={} frames={} malformed={} samples={}",
            self.get_lines(),
            self.get_frames(),
            self.get_malformed(),
            self.get_samples()
        )
    }
}
