//! Cycle segmentation
//!
//! Every batch holds roughly one instrument cycle: a sharp leading edge, a
//! peak, and a decaying tail that runs into the next leading edge. The
//! dominant peak is the global maximum; the boundaries are the closest local
//! valleys that also stand out from a short moving average, which keeps
//! sample-to-sample jitter from being taken as the end of the decay.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{DlsError, Result, Side};

/// Boundary search tuning
///
/// The defaults were tuned by hand against the bench instrument; there is
/// no derivation for them and they may need retuning for other gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Deviation from the moving average a right-side valley must exceed
    pub tolerance: f64,
    /// The left side uses `tolerance / left_tolerance_divisor`
    pub left_tolerance_divisor: f64,
    /// Samples averaged walking left from a candidate
    pub left_window: usize,
    /// Samples averaged walking right from a candidate
    pub right_window: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            tolerance: 4.0,
            left_tolerance_divisor: 4.0,
            left_window: 4,
            right_window: 3,
        }
    }
}

/// Indices bracketing the dominant peak of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakBounds {
    pub left_min: usize,
    pub peak: usize,
    pub right_min: usize,
}

/// One decay cycle cut from a batch, peak first
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle {
    /// Index of the batch it came from
    pub batch: usize,
    pub intensities: Vec<i32>,
    /// Per-sample time step of the source batch, microseconds
    pub step_us: f64,
}

impl Cycle {
    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }

    /// Peak-relative time of each sample, microseconds
    pub fn lag_axis_us(&self) -> Vec<f64> {
        (0..self.len()).map(|j| j as f64 * self.step_us).collect()
    }

    pub fn min_intensity(&self) -> i32 {
        self.intensities.iter().copied().min().unwrap_or(0)
    }
}

/// Index of the first occurrence of the maximum
fn first_argmax(y: &[i32]) -> usize {
    let mut best = 0;
    for (i, &v) in y.iter().enumerate().skip(1) {
        if v > y[best] {
            best = i;
        }
    }
    best
}

/// Moving average over `window` samples starting at `start` and walking in
/// `dir`. Samples past either end of the trace count as zero; the divisor
/// is always the full window.
///
/// Near the left edge (`start < window − 1`) this pulls the average toward
/// zero instead of averaging only the samples that exist, so a flat lead-in
/// resolves its left minimum to index 2 rather than 3. The right edge
/// behaves the same way, giving `len − 2` on a flat tail.
fn directional_average(y: &[i32], start: usize, window: usize, dir: Side) -> f64 {
    let sum: i64 = match dir {
        Side::Left => y[..=start].iter().rev().take(window).map(|&v| v as i64).sum(),
        Side::Right => y[start..].iter().take(window).map(|&v| v as i64).sum(),
    };
    sum as f64 / window as f64
}

#[inline]
fn is_valley(y: &[i32], i: usize) -> bool {
    y[i - 1] >= y[i] && y[i] <= y[i + 1]
}

/// Locate the dominant peak and the nearest genuine minima around it
pub fn find_peak_bounds(y: &[i32], config: &SegmenterConfig) -> Result<PeakBounds> {
    if y.len() < 3 {
        return Err(DlsError::InsufficientSamples(y.len()));
    }

    let peak = first_argmax(y);

    let left_threshold = config.tolerance / config.left_tolerance_divisor;
    let left_min = (1..peak).rev().find(|&i| {
        is_valley(y, i)
            && (directional_average(y, i, config.left_window, Side::Left) - y[i] as f64).abs()
                > left_threshold
    });

    let right_min = (peak + 1..y.len() - 1).find(|&i| {
        is_valley(y, i)
            && (directional_average(y, i, config.right_window, Side::Right) - y[i] as f64).abs()
                > config.tolerance
    });

    trace!(
        "Peak search: peak={} left={:?} right={:?} len={}",
        peak,
        left_min,
        right_min,
        y.len()
    );

    let left_min = left_min.ok_or(DlsError::NoPeakBoundaryFound {
        side: Side::Left,
        peak,
    })?;
    let right_min = right_min.ok_or(DlsError::NoPeakBoundaryFound {
        side: Side::Right,
        peak,
    })?;

    Ok(PeakBounds {
        left_min,
        peak,
        right_min,
    })
}

/// Cut the decay cycle (peak through right minimum, inclusive) from a batch
pub fn segment_batch(
    batch: usize,
    intensities: &[i32],
    step_us: f64,
    config: &SegmenterConfig,
) -> Result<Cycle> {
    let bounds = find_peak_bounds(intensities, config)?;
    Ok(Cycle {
        batch,
        intensities: intensities[bounds.peak..=bounds.right_min].to_vec(),
        step_us,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat lead-in, linear rise to `peak`, linear decay, flat tail
    fn triangle(len: usize, peak: usize, base: i32, height: i32) -> Vec<i32> {
        let flat = 3;
        let fall_end = len - flat;
        (0..len)
            .map(|i| {
                if i <= flat {
                    base
                } else if i <= peak {
                    base + height * (i - flat) as i32 / (peak - flat) as i32
                } else if i < fall_end {
                    base + height * (fall_end - i) as i32 / (fall_end - peak) as i32
                } else {
                    base
                }
            })
            .collect()
    }

    #[test]
    fn test_triangle_bounds() {
        let config = SegmenterConfig::default();
        for &(len, peak) in &[(20usize, 9usize), (40, 12), (100, 70), (800, 300), (1600, 400)] {
            let y = triangle(len, peak, 50, 500);
            let b = find_peak_bounds(&y, &config).unwrap();
            assert_eq!(b.peak, peak, "len={}", len);
            assert!(b.left_min <= 3, "len={} left={}", len, b.left_min);
            assert!(b.right_min >= len - 4, "len={} right={}", len, b.right_min);
        }
    }

    #[test]
    fn test_short_input() {
        let config = SegmenterConfig::default();
        assert!(matches!(
            find_peak_bounds(&[1, 2], &config),
            Err(DlsError::InsufficientSamples(2))
        ));
    }

    #[test]
    fn test_monotonic_rise_has_no_left_minimum() {
        let y: Vec<i32> = (0..50).map(|i| i * 10).chain([400, 300, 200, 300]).collect();
        let err = find_peak_bounds(&y, &SegmenterConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            DlsError::NoPeakBoundaryFound {
                side: Side::Left,
                ..
            }
        ));
    }

    #[test]
    fn test_jitter_valley_is_skipped() {
        // A one-count dip in the tail must not end the cycle early
        let mut y = vec![100, 90, 80, 90, 200, 1000, 800, 600, 400, 300, 250, 249, 250, 240];
        y.extend([220, 200, 200, 200, 600, 900]);
        let b = find_peak_bounds(&y, &SegmenterConfig::default()).unwrap();
        assert_eq!(b.peak, 5);
        assert_eq!(b.left_min, 2);
        assert_eq!(b.right_min, 16);
    }

    #[test]
    fn test_flat_edges_resolve_inside_the_padding() {
        let y = triangle(20, 9, 50, 500);
        let b = find_peak_bounds(&y, &SegmenterConfig::default()).unwrap();
        assert_eq!(b.left_min, 2);
        assert_eq!(b.right_min, 18);
        assert_eq!(directional_average(&y, 2, 4, Side::Left), 37.5);
        assert_eq!(directional_average(&y, 18, 3, Side::Right), 100.0 / 3.0);
    }

    #[test]
    fn test_first_of_equal_maxima() {
        let y = vec![10, 5, 50, 20, 50, 5, 60, 5, 90, 90, 10, 30, 80];
        assert_eq!(first_argmax(&y), 8);
    }

    #[test]
    fn test_segment_batch_cuts_peak_to_right_min() {
        let y = triangle(40, 12, 50, 500);
        let cycle = segment_batch(3, &y, 8.0, &SegmenterConfig::default()).unwrap();
        let b = find_peak_bounds(&y, &SegmenterConfig::default()).unwrap();
        assert_eq!(cycle.batch, 3);
        assert_eq!(cycle.len(), b.right_min - b.peak + 1);
        assert_eq!(cycle.intensities[0], 550);
        assert_eq!(cycle.lag_axis_us()[2], 16.0);
    }
}
