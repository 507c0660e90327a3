//! Time series reassembly
//!
//! Each frame carries only the total time its batch took. Samples inside a
//! batch are spread evenly over that time and the batch is offset by the sum
//! of every earlier batch, so the whole session reads as one monotonic trace.

use serde::{Deserialize, Serialize};

use super::frame::RawFrame;
use crate::error::{DlsError, Result};

/// One intensity reading on the session clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub timestamp_us: i64,
    pub intensity: i32,
    pub temperature_c: Option<f64>,
}

/// Where one appended batch lives inside the sample stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchSpan {
    pub start: usize,
    pub len: usize,
    pub step_us: f64,
    pub elapsed_us: u64,
}

/// Append-only session trace
///
/// Owned by whoever drives acquisition; a new measurement starts from
/// `TimeSeriesAssembler::new()`.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesAssembler {
    batch_len: usize,
    samples: Vec<TimeSample>,
    batches: Vec<BatchSpan>,
    cumulative_elapsed_us: u64,
}

impl TimeSeriesAssembler {
    pub fn new(batch_len: usize) -> Self {
        Self {
            batch_len,
            ..Self::default()
        }
    }

    /// Rebuild a session from a recorded raw table
    ///
    /// The stream is cut into batches of `batch_len`; a trailing partial
    /// batch is kept. Each batch's step is taken from its own timestamps.
    pub fn from_samples(samples: Vec<TimeSample>, batch_len: usize) -> Result<Self> {
        if batch_len == 0 {
            return Err(DlsError::InvalidConfig("batch length must be positive".to_string()));
        }
        if samples.windows(2).any(|w| w[1].timestamp_us <= w[0].timestamp_us) {
            return Err(DlsError::MalformedFrame(
                "recorded timestamps are not strictly increasing".to_string(),
            ));
        }

        let mut batches = Vec::new();
        let mut start = 0;
        while start < samples.len() {
            let len = batch_len.min(samples.len() - start);
            let first = samples[start].timestamp_us;
            // The next batch's first stamp closes this one when available
            let step_us = if start + len < samples.len() {
                (samples[start + len].timestamp_us - first) as f64 / len as f64
            } else if len > 1 {
                (samples[start + len - 1].timestamp_us - first) as f64 / (len - 1) as f64
            } else {
                1.0
            };
            let elapsed_us = (step_us * len as f64).round() as u64;
            batches.push(BatchSpan {
                start,
                len,
                step_us,
                elapsed_us,
            });
            start += len;
        }

        let cumulative_elapsed_us = batches.iter().map(|b| b.elapsed_us).sum();

        Ok(Self {
            batch_len,
            samples,
            batches,
            cumulative_elapsed_us,
        })
    }

    /// Append one frame, returning the samples it produced
    ///
    /// The frame is checked before any state changes, so a rejected frame
    /// leaves the trace untouched.
    pub fn append(&mut self, frame: &RawFrame) -> Result<&[TimeSample]> {
        let n = frame.len();
        if n != self.batch_len {
            return Err(DlsError::MalformedFrame(format!(
                "frame has {} samples, session expects {}",
                n, self.batch_len
            )));
        }
        if frame.elapsed_us < n as u64 {
            return Err(DlsError::MalformedFrame(format!(
                "elapsed time {} us too short for {} samples",
                frame.elapsed_us, n
            )));
        }

        let step_us = frame.step_us();
        let offset = self.cumulative_elapsed_us as f64;
        let start = self.samples.len();

        self.samples.extend(frame.intensities.iter().enumerate().map(|(i, &intensity)| {
            TimeSample {
                timestamp_us: (i as f64 * step_us + offset).round() as i64,
                intensity,
                temperature_c: frame.temperature_c,
            }
        }));
        self.batches.push(BatchSpan {
            start,
            len: n,
            step_us,
            elapsed_us: frame.elapsed_us,
        });
        self.cumulative_elapsed_us += frame.elapsed_us;

        Ok(&self.samples[start..])
    }

    pub fn batch_len(&self) -> usize {
        self.batch_len
    }

    pub fn samples(&self) -> &[TimeSample] {
        &self.samples
    }

    pub fn batches(&self) -> &[BatchSpan] {
        &self.batches
    }

    pub fn cumulative_elapsed_us(&self) -> u64 {
        self.cumulative_elapsed_us
    }

    /// Raw intensities of one batch
    pub fn batch_intensities(&self, span: &BatchSpan) -> Vec<i32> {
        self.samples[span.start..span.start + span.len]
            .iter()
            .map(|s| s.intensity)
            .collect()
    }

    /// Mean of every temperature reading in the session, if any
    pub fn mean_temperature_c(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter_map(|s| s.temperature_c)
            .fold((0.0, 0usize), |(sum, count), t| (sum + t, count + 1));
        (count > 0).then(|| sum / count as f64)
    }
}
