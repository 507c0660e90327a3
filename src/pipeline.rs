//! Batch analysis: segmentation through size aggregation
//!
//! Runs after acquisition on a blocking thread. Batches are segmented in
//! order, then every replicate dataset is correlated, inverted and solved on
//! the rayon pool.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::decoder::TimeSeriesAssembler;
use crate::dsp::correlation::{self, group_cycles};
use crate::dsp::segment::segment_batch;
use crate::dsp::siegert;
use crate::dsp::{AutocorrelationCurve, CorrelationConfig, Cycle, SegmenterConfig};
use crate::error::{DlsError, Result};
use crate::inversion::{ContributionSpectrum, FittingGrid, GridSpec, Optics, SolverConfig, SpectralSolver};
use crate::report::{aggregate, ReportRange, SizeResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub segmenter: SegmenterConfig,
    pub correlation: CorrelationConfig,
    pub optics: Optics,
    pub grid: GridSpec,
    pub solver: SolverConfig,
    pub report: ReportRange,
    /// Replace the configured temperature with the session mean when frames
    /// carry readings
    pub use_measured_temperature: bool,
}

/// Measured correlation next to the one the recovered spectrum predicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocorrelationFit {
    pub dataset: usize,
    pub beta: f64,
    pub lags_s: Vec<f64>,
    pub measured_g2: Vec<f64>,
    /// `None` where the Siegert step dropped the lag
    pub measured_g1: Vec<Option<f64>>,
    pub predicted_g1: Vec<f64>,
    pub predicted_g2: Vec<f64>,
}

impl AutocorrelationFit {
    fn new(curve: &AutocorrelationCurve, source_index: &[usize], g1: &[f64], predicted_g1: Vec<f64>) -> Self {
        let mut measured_g1 = vec![None; curve.len()];
        for (&j, &v) in source_index.iter().zip(g1) {
            measured_g1[j] = Some(v);
        }
        let predicted_g2 = predicted_g1
            .iter()
            .map(|g| 1.0 + curve.beta * g * g)
            .collect();
        Self {
            dataset: curve.dataset,
            beta: curve.beta,
            lags_s: curve.lags_s.clone(),
            measured_g2: curve.g2.clone(),
            measured_g1,
            predicted_g1,
            predicted_g2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Optics the grid was built with, after any temperature substitution
    pub optics: Optics,
    pub cycles: Vec<Cycle>,
    /// Batches with no usable peak boundaries
    pub rejected_batches: Vec<usize>,
    pub spectra: Vec<ContributionSpectrum>,
    pub fits: Vec<AutocorrelationFit>,
    pub result: SizeResult,
}

struct DatasetAnalysis {
    spectrum: ContributionSpectrum,
    fit: AutocorrelationFit,
}

fn analyze_dataset(
    dataset: usize,
    cycles: &[Cycle],
    config: &CorrelationConfig,
    solver: &SpectralSolver<'_>,
) -> Result<DatasetAnalysis> {
    let curve = correlation::estimate(dataset, cycles, config).ok_or_else(|| {
        DlsError::SpectralSolveFailure(format!("dataset {} has no usable g2 curve", dataset))
    })?;

    let field = siegert::invert(&curve);
    if field.excluded > 0 {
        debug!(
            "Dataset {}: {} of {} lags outside the Siegert domain",
            dataset,
            field.excluded,
            curve.len()
        );
    }

    let spectrum = solver.solve(&field)?;
    let predicted_g1 = solver.predict(&curve.lags_s, &spectrum.weights);
    let fit = AutocorrelationFit::new(&curve, &field.source_index, &field.g1, predicted_g1);

    Ok(DatasetAnalysis { spectrum, fit })
}

/// Analyze one recorded session
pub fn run(series: &TimeSeriesAssembler, config: &PipelineConfig) -> Result<PipelineOutput> {
    let mut optics = config.optics;
    if config.use_measured_temperature {
        if let Some(t) = series.mean_temperature_c() {
            debug!("Using measured temperature {:.2} C", t);
            optics.temperature_c = t;
        }
    }
    let grid = FittingGrid::new(&optics, &config.grid)?;
    let solver = SpectralSolver::new(&grid, config.solver)?;

    let mut cycles = Vec::new();
    let mut rejected_batches = Vec::new();
    for (k, span) in series.batches().iter().enumerate() {
        let intensities = series.batch_intensities(span);
        match segment_batch(k, &intensities, span.step_us, &config.segmenter) {
            Ok(cycle) => cycles.push(cycle),
            Err(e) => {
                debug!("Batch {} skipped: {}", k, e);
                rejected_batches.push(k);
            }
        }
    }
    info!(
        "[Pipeline] {} cycle(s) from {} batch(es), {} rejected",
        cycles.len(),
        series.batches().len(),
        rejected_batches.len()
    );

    let groups = group_cycles(cycles.clone(), config.correlation.datasets);
    let outcomes: Vec<(usize, Result<DatasetAnalysis>)> = groups
        .par_iter()
        .enumerate()
        .map(|(d, group)| (d, analyze_dataset(d, group, &config.correlation, &solver)))
        .collect();

    let mut spectra = Vec::new();
    let mut fits = Vec::new();
    let mut excluded = Vec::new();
    for (d, outcome) in outcomes {
        match outcome {
            Ok(analysis) => {
                spectra.push(analysis.spectrum);
                fits.push(analysis.fit);
            }
            Err(e) => {
                warn!("Dataset {} excluded: {}", d, e);
                excluded.push(d);
            }
        }
    }

    let result = aggregate(&spectra, &config.report, excluded)?;

    Ok(PipelineOutput {
        optics,
        cycles,
        rejected_batches,
        spectra,
        fits,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::RawFrame;

    const BATCH: usize = 1600;
    const ELAPSED_US: u64 = 14110;
    const BASE: f64 = 100_000.0;
    const AMPLITUDE: f64 = 300_000.0;

    /// Flat lead-in, linear rise to the peak at 150, then B + A·exp(-2Γt)
    fn synthetic_batch(gamma: f64) -> Vec<i32> {
        let step_s = ELAPSED_US as f64 / BATCH as f64 * 1e-6;
        (0..BATCH)
            .map(|i| {
                let v = if i < 100 {
                    BASE
                } else if i < 150 {
                    BASE + AMPLITUDE * (i - 100) as f64 / 50.0
                } else {
                    let t = (i - 150) as f64 * step_s;
                    BASE + AMPLITUDE * (-2.0 * gamma * t).exp()
                };
                v.round() as i32
            })
            .collect()
    }

    fn session(batches: Vec<Vec<i32>>) -> TimeSeriesAssembler {
        let mut asm = TimeSeriesAssembler::new(BATCH);
        for intensities in batches {
            asm.append(&RawFrame {
                intensities,
                elapsed_us: ELAPSED_US,
                temperature_c: Some(25.0),
            })
            .unwrap();
        }
        asm
    }

    #[test]
    fn test_end_to_end_single_size() {
        let config = PipelineConfig {
            use_measured_temperature: true,
            ..PipelineConfig::default()
        };
        let grid = FittingGrid::new(&config.optics, &config.grid).unwrap();

        // About 24 nm and 122 nm; one grid step is an 8.5 % change
        for k in [60usize, 80] {
            let truth_nm = 2.0 * grid.radii_nm()[k];
            let gamma = grid.decay_rates()[k];

            let series = session((0..7).map(|_| synthetic_batch(gamma)).collect());
            let out = run(&series, &config).unwrap();

            assert_eq!(out.cycles.len(), 7);
            assert!(out.rejected_batches.is_empty());
            assert_eq!(out.spectra.len(), 7);
            assert!(out.result.excluded.is_empty());
            let rel = (out.result.average_diameter_nm - truth_nm).abs() / truth_nm;
            assert!(
                rel < 0.09,
                "k={}: average {} nm, expected {} nm",
                k,
                out.result.average_diameter_nm,
                truth_nm
            );
            for fit in &out.fits {
                assert!((fit.beta - AMPLITUDE / BASE).abs() < 0.05, "beta={}", fit.beta);
                assert_eq!(fit.lags_s.len(), fit.predicted_g2.len());
                assert_eq!(fit.measured_g1.len(), fit.measured_g2.len());
            }
        }
    }

    #[test]
    fn test_flat_batches_give_no_result() {
        let series = session((0..3).map(|_| vec![500; BATCH]).collect());
        let err = run(&series, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, DlsError::NoValidDatasets));
    }

    #[test]
    fn test_missing_datasets_are_excluded() {
        let config = PipelineConfig::default();
        let grid = FittingGrid::new(&config.optics, &config.grid).unwrap();
        let gamma = grid.decay_rates()[80];
        // Three cycles for seven datasets
        let series = session((0..3).map(|_| synthetic_batch(gamma)).collect());
        let out = run(&series, &config).unwrap();
        assert_eq!(out.result.datasets.len(), 3);
        assert_eq!(out.result.excluded, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_fit_maps_dropped_lags() {
        let curve = AutocorrelationCurve {
            dataset: 1,
            lags_s: vec![0.0, 1.0, 2.0],
            g2: vec![1.5, 0.9, 1.1],
            beta: 0.5,
            cycles: 1,
        };
        let fit = AutocorrelationFit::new(&curve, &[0, 2], &[1.0, 0.2f64.sqrt()], vec![1.0, 0.5, 0.0]);
        assert_eq!(fit.measured_g1[1], None);
        assert_eq!(fit.measured_g1[0], Some(1.0));
        assert_eq!(fit.predicted_g2, vec![1.5, 1.125, 1.0]);
    }
}
