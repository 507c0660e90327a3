//! Second-order autocorrelation estimate per replicate dataset
//!
//! Cycles are dealt round-robin into a fixed number of datasets, matching
//! the number of repeats the instrument runs per measurement. Each dataset
//! yields one g2 curve and one coherence factor.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::segment::Cycle;

/// How a dataset's cycles are turned into g2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMode {
    /// The cycle already is the hardware-correlated decay; average the
    /// aligned traces and normalize by the baseline
    Decay,
    /// Software intensity autocorrelation of each cycle
    Intensity,
}

impl std::str::FromStr for CorrelationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decay" => Ok(Self::Decay),
            "intensity" => Ok(Self::Intensity),
            other => Err(format!("unknown correlation mode {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Number of replicate datasets per run
    pub datasets: usize,
    pub mode: CorrelationMode,
    /// Share of the averaged trace (from the end) used as the g2 = 1 baseline
    pub baseline_fraction: f64,
    /// Leading lags used to extrapolate the g2 intercept
    pub beta_fit_points: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            datasets: 7,
            mode: CorrelationMode::Decay,
            baseline_fraction: 0.1,
            beta_fit_points: 5,
        }
    }
}

/// Measured g2 for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocorrelationCurve {
    pub dataset: usize,
    /// Lag axis, seconds
    pub lags_s: Vec<f64>,
    pub g2: Vec<f64>,
    /// Coherence factor, g2(0) - 1 extrapolated
    pub beta: f64,
    /// Cycles averaged into this curve
    pub cycles: usize,
}

impl AutocorrelationCurve {
    pub fn len(&self) -> usize {
        self.g2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.g2.is_empty()
    }
}

/// Deal cycles into `datasets` groups: cycle k goes to group k mod datasets
pub fn group_cycles(cycles: Vec<Cycle>, datasets: usize) -> Vec<Vec<Cycle>> {
    let mut groups: Vec<Vec<Cycle>> = (0..datasets).map(|_| Vec::new()).collect();
    if datasets == 0 {
        return groups;
    }
    for (k, cycle) in cycles.into_iter().enumerate() {
        groups[k % datasets].push(cycle);
    }
    groups
}

/// Align cycles at the peak and pad each to the longest with its own tail
pub fn aligned_traces(cycles: &[Cycle]) -> Vec<Vec<f64>> {
    let longest = cycles.iter().map(Cycle::len).max().unwrap_or(0);
    cycles
        .iter()
        .map(|c| {
            let tail = c.min_intensity() as f64;
            let mut trace: Vec<f64> = c.intensities.iter().map(|&v| v as f64).collect();
            trace.resize(longest, tail);
            trace
        })
        .collect()
}

fn mean_step_s(cycles: &[Cycle]) -> f64 {
    cycles.iter().map(|c| c.step_us).sum::<f64>() / cycles.len() as f64 * 1e-6
}

/// Averaged decay normalized so the settled tail sits at g2 = 1
fn decay_g2(cycles: &[Cycle], baseline_fraction: f64) -> Option<Vec<f64>> {
    let traces = aligned_traces(cycles);
    let len = traces.first()?.len();
    if len == 0 {
        return None;
    }

    let mean: Vec<f64> = (0..len)
        .map(|j| traces.iter().map(|t| t[j]).sum::<f64>() / traces.len() as f64)
        .collect();

    let tail_len = ((len as f64 * baseline_fraction).ceil() as usize).clamp(1, len);
    let baseline = mean[len - tail_len..].iter().sum::<f64>() / tail_len as f64;
    if !(baseline > 0.0) {
        return None;
    }

    Some(mean.into_iter().map(|v| v / baseline).collect())
}

/// Normalized intensity autocorrelation, lags up to half the shortest cycle
fn intensity_g2(cycles: &[Cycle]) -> Option<Vec<f64>> {
    let shortest = cycles.iter().map(Cycle::len).min()?;
    let max_lag = shortest / 2;
    if max_lag == 0 {
        return None;
    }

    let mut acc = vec![0.0; max_lag];
    for cycle in cycles {
        let x: Vec<f64> = cycle.intensities.iter().map(|&v| v as f64).collect();
        let n = x.len();
        let mean = x.iter().sum::<f64>() / n as f64;
        if !(mean > 0.0) {
            return None;
        }
        for (k, slot) in acc.iter_mut().enumerate() {
            let pairs = n - k;
            let s: f64 = (0..pairs).map(|t| x[t] * x[t + k]).sum();
            *slot += s / pairs as f64 / (mean * mean);
        }
    }

    let count = cycles.len() as f64;
    Some(acc.into_iter().map(|v| v / count).collect())
}

/// Intercept of g2 - 1 at zero lag
///
/// Straight-line fit of ln(g2 - 1) over the leading lags where g2 exceeds 1,
/// falling back to the zero-lag value when fewer than two lags qualify.
pub fn estimate_beta(lags_s: &[f64], g2: &[f64], fit_points: usize) -> Option<f64> {
    let pts: Vec<(f64, f64)> = lags_s
        .iter()
        .zip(g2)
        .take(fit_points)
        .take_while(|&(_, &g)| g > 1.0 && g.is_finite())
        .map(|(&t, &g)| (t, (g - 1.0).ln()))
        .collect();

    let beta = if pts.len() >= 2 {
        let n = pts.len() as f64;
        let mean_t = pts.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
        let sxx: f64 = pts.iter().map(|p| (p.0 - mean_t).powi(2)).sum();
        let sxy: f64 = pts.iter().map(|p| (p.0 - mean_t) * (p.1 - mean_y)).sum();
        let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
        (mean_y - slope * mean_t).exp()
    } else {
        g2.first()? - 1.0
    };

    (beta.is_finite() && beta > 0.0).then_some(beta)
}

/// Build the g2 curve and beta for one dataset
///
/// Returns `None` when the dataset cannot be normalized (no cycles, zero
/// baseline, non-positive intercept); it is then left out of the run.
pub fn estimate(
    dataset: usize,
    cycles: &[Cycle],
    config: &CorrelationConfig,
) -> Option<AutocorrelationCurve> {
    if cycles.is_empty() {
        debug!("Dataset {}: no cycles", dataset);
        return None;
    }

    let g2 = match config.mode {
        CorrelationMode::Decay => decay_g2(cycles, config.baseline_fraction),
        CorrelationMode::Intensity => intensity_g2(cycles),
    };
    let Some(g2) = g2 else {
        debug!("Dataset {}: could not normalize g2", dataset);
        return None;
    };

    let step_s = mean_step_s(cycles);
    let lags_s: Vec<f64> = (0..g2.len()).map(|j| j as f64 * step_s).collect();

    let Some(beta) = estimate_beta(&lags_s, &g2, config.beta_fit_points) else {
        debug!("Dataset {}: no positive g2 intercept", dataset);
        return None;
    };

    Some(AutocorrelationCurve {
        dataset,
        lags_s,
        g2,
        beta,
        cycles: cycles.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(batch: usize, values: Vec<i32>) -> Cycle {
        Cycle {
            batch,
            intensities: values,
            step_us: 10.0,
        }
    }

    #[test]
    fn test_round_robin_grouping() {
        let cycles: Vec<Cycle> = (0..10).map(|k| cycle(k, vec![1, 2, 3])).collect();
        let groups = group_cycles(cycles, 3);
        assert_eq!(groups.len(), 3);
        let batches: Vec<Vec<usize>> = groups
            .iter()
            .map(|g| g.iter().map(|c| c.batch).collect())
            .collect();
        assert_eq!(batches, vec![vec![0, 3, 6, 9], vec![1, 4, 7], vec![2, 5, 8]]);
    }

    #[test]
    fn test_alignment_pads_with_tail() {
        let traces = aligned_traces(&[cycle(0, vec![9, 5, 3]), cycle(1, vec![8, 4, 2, 1, 2])]);
        assert_eq!(traces[0], vec![9.0, 5.0, 3.0, 3.0, 3.0]);
        assert_eq!(traces[1].len(), 5);
    }

    #[test]
    fn test_decay_curve_recovers_beta() {
        // I = B (1 + beta exp(-2 gamma t)), beta = 0.5
        let gamma = 2000.0;
        let values: Vec<i32> = (0..400)
            .map(|j| {
                let t = j as f64 * 10e-6;
                (100_000.0 * (1.0 + 0.5 * (-2.0 * gamma * t).exp())).round() as i32
            })
            .collect();
        let config = CorrelationConfig::default();
        let curve = estimate(0, &[cycle(0, values)], &config).unwrap();
        assert_eq!(curve.cycles, 1);
        assert!((curve.beta - 0.5).abs() < 1e-3, "beta={}", curve.beta);
        assert!((curve.g2[0] - 1.5).abs() < 1e-3);
        assert!((curve.lags_s[1] - 10e-6).abs() < 1e-15);
    }

    #[test]
    fn test_beta_fallback_to_zero_lag() {
        let beta = estimate_beta(&[0.0, 1.0, 2.0], &[1.4, 0.9, 1.2], 5).unwrap();
        assert!((beta - 0.4).abs() < 1e-12);
        assert!(estimate_beta(&[0.0, 1.0], &[0.8, 1.1], 5).is_none());
    }

    #[test]
    fn test_intensity_mode_alternating_signal() {
        let config = CorrelationConfig {
            mode: CorrelationMode::Intensity,
            ..CorrelationConfig::default()
        };
        // Alternating signal: correlated at even lags, anti-correlated at odd
        let values: Vec<i32> = (0..40).map(|j| if j % 2 == 0 { 30 } else { 10 }).collect();
        let curve = estimate(2, &[cycle(0, values)], &config).unwrap();
        assert_eq!(curve.dataset, 2);
        assert_eq!(curve.len(), 20);
        assert!((curve.g2[0] - 1.25).abs() < 1e-12);
        assert!((curve.g2[1] - 0.75).abs() < 1e-12);
        assert!((curve.beta - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_empty_dataset() {
        assert!(estimate(0, &[], &CorrelationConfig::default()).is_none());
    }
}
