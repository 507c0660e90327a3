//! Regularized inversion of g1 into a size spectrum
//!
//! g1(τ_j) = Σ_i x_i·exp(−Γ_i·τ_j) is solved for x ≥ 0 with a second-difference
//! roughness penalty. The penalty weight is swept over a log range and the
//! corner of the log–log L-curve picks the final value.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::grid::FittingGrid;
use super::nnls::nnls_gram;
use crate::dsp::FieldCorrelation;
use crate::error::{DlsError, Result};

/// Floor applied to norms before taking logs
const NORM_FLOOR: f64 = 1e-300;

/// Sweep points at each end left out of the corner search
const CORNER_MARGIN: usize = 2;

/// ‖L·x‖ below this fraction of its largest value counts as collapsed
const COLLAPSE_RATIO: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub alpha_count: usize,
    /// Inner NNLS iterations allowed per solve; `None` means 5 per grid point
    pub max_iterations: Option<usize>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            alpha_min: 1e-6,
            alpha_max: 1e4,
            alpha_count: 50,
            max_iterations: None,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha_min > 0.0 && self.alpha_max > self.alpha_min) {
            return Err(DlsError::InvalidConfig(format!(
                "regularization sweep must satisfy 0 < min < max, got {} .. {}",
                self.alpha_min, self.alpha_max
            )));
        }
        if self.alpha_count < 3 {
            return Err(DlsError::InvalidConfig(
                "regularization sweep needs at least 3 values".to_string(),
            ));
        }
        Ok(())
    }

    /// Log-spaced sweep, ascending
    pub fn alphas(&self) -> Vec<f64> {
        let lo = self.alpha_min.ln();
        let hi = self.alpha_max.ln();
        let last = (self.alpha_count - 1) as f64;
        (0..self.alpha_count)
            .map(|k| (lo + (hi - lo) * k as f64 / last).exp())
            .collect()
    }
}

/// One sample of the L-curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LCurvePoint {
    pub alpha: f64,
    /// ‖A·x − g1‖
    pub residual_norm: f64,
    /// ‖L·x‖
    pub solution_norm: f64,
}

/// Non-negative size spectrum for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionSpectrum {
    pub dataset: usize,
    pub radii_nm: Vec<f64>,
    pub weights: Vec<f64>,
    /// Regularization weight the spectrum was solved with
    pub alpha: f64,
    pub residual_norm: f64,
    pub l_curve: Vec<LCurvePoint>,
}

impl ContributionSpectrum {
    /// Weights scaled to sum to one
    pub fn relative_weights(&self) -> Vec<f64> {
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 {
            self.weights.iter().map(|w| w / total).collect()
        } else {
            vec![0.0; self.weights.len()]
        }
    }
}

/// Second-difference operator, (n−2)×n
pub fn second_difference(n: usize) -> DMatrix<f64> {
    let rows = n.saturating_sub(2);
    let mut l = DMatrix::zeros(rows, n);
    for r in 0..rows {
        l[(r, r)] = 1.0;
        l[(r, r + 1)] = -2.0;
        l[(r, r + 2)] = 1.0;
    }
    l
}

/// Index of the L-curve corner: largest signed curvature of
/// (ln residual, ln solution norm) against ln α
///
/// Points must be in ascending α order. The first and last two points are
/// never chosen (only the endpoints on curves shorter than five points), and
/// neither is any point whose stencil touches a collapsed ‖L·x‖.
pub fn select_corner(points: &[LCurvePoint]) -> Option<usize> {
    if points.len() < 3 {
        return None;
    }
    let margin = if points.len() > 2 * CORNER_MARGIN { CORNER_MARGIN } else { 1 };
    let collapsed = points
        .iter()
        .map(|p| p.solution_norm)
        .fold(0.0, f64::max)
        * COLLAPSE_RATIO;

    let t: Vec<f64> = points.iter().map(|p| p.alpha.ln()).collect();
    let x: Vec<f64> = points.iter().map(|p| p.residual_norm.max(NORM_FLOOR).ln()).collect();
    let y: Vec<f64> = points.iter().map(|p| p.solution_norm.max(NORM_FLOOR).ln()).collect();

    let mut best: Option<(usize, f64)> = None;
    for k in margin..points.len() - margin {
        if points[k - 1..=k + 1].iter().any(|p| !(p.solution_norm > collapsed)) {
            continue;
        }
        let h0 = t[k] - t[k - 1];
        let h1 = t[k + 1] - t[k];
        if !(h0 > 0.0 && h1 > 0.0) {
            continue;
        }
        // Non-uniform central differences
        let d1 = |v: &[f64]| {
            (v[k + 1] - v[k]) * h0 / (h1 * (h0 + h1)) + (v[k] - v[k - 1]) * h1 / (h0 * (h0 + h1))
        };
        let d2 = |v: &[f64]| 2.0 * ((v[k + 1] - v[k]) / h1 - (v[k] - v[k - 1]) / h0) / (h0 + h1);

        let (x1, y1, x2, y2) = (d1(&x), d1(&y), d2(&x), d2(&y));
        let speed = (x1 * x1 + y1 * y1).powf(1.5);
        if !(speed > 0.0) {
            continue;
        }
        let kappa = (x1 * y2 - y1 * x2) / speed;
        if kappa.is_finite() && best.map_or(true, |(_, b)| kappa > b) {
            best = Some((k, kappa));
        }
    }
    best.map(|(k, _)| k)
}

/// Normal equations for one dataset, shared by every α of the sweep
pub struct NormalSystem {
    kernel: DMatrix<f64>,
    target: DVector<f64>,
    gram: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl NormalSystem {
    pub fn residual_norm(&self, x: &DVector<f64>) -> f64 {
        (&self.kernel * x - &self.target).norm()
    }
}

pub struct SpectralSolver<'a> {
    grid: &'a FittingGrid,
    config: SolverConfig,
    roughness_op: DMatrix<f64>,
    roughness_gram: DMatrix<f64>,
}

impl<'a> SpectralSolver<'a> {
    pub fn new(grid: &'a FittingGrid, config: SolverConfig) -> Result<Self> {
        config.validate()?;
        let roughness_op = second_difference(grid.len());
        let roughness_gram = roughness_op.tr_mul(&roughness_op);
        Ok(Self {
            grid,
            config,
            roughness_op,
            roughness_gram,
        })
    }

    pub fn grid(&self) -> &FittingGrid {
        self.grid
    }

    fn max_iterations(&self) -> usize {
        self.config.max_iterations.unwrap_or(5 * self.grid.len())
    }

    /// Forward model, one row per lag and one column per grid point
    pub fn kernel(&self, lags_s: &[f64]) -> DMatrix<f64> {
        let rates = self.grid.decay_rates();
        DMatrix::from_fn(lags_s.len(), rates.len(), |j, i| (-rates[i] * lags_s[j]).exp())
    }

    /// Build the normal equations for one dataset's g1
    pub fn normal_system(&self, field: &FieldCorrelation) -> Result<NormalSystem> {
        if field.is_empty() {
            return Err(DlsError::SpectralSolveFailure("no valid lags".to_string()));
        }
        let target = DVector::from_column_slice(&field.g1);
        if !(target.norm() > 0.0) {
            return Err(DlsError::SpectralSolveFailure("g1 is identically zero".to_string()));
        }
        let kernel = self.kernel(&field.lags_s);
        let gram = kernel.tr_mul(&kernel);
        let rhs = kernel.tr_mul(&target);
        Ok(NormalSystem {
            kernel,
            target,
            gram,
            rhs,
        })
    }

    /// Non-negative Tikhonov solution at a fixed α
    pub fn solve_with_alpha(&self, system: &NormalSystem, alpha: f64) -> Result<DVector<f64>> {
        let gram = &system.gram + &self.roughness_gram * alpha;
        nnls_gram(&gram, &system.rhs, self.max_iterations())
    }

    /// Convenience: solve one dataset at a fixed α
    pub fn solve_at(&self, field: &FieldCorrelation, alpha: f64) -> Result<Vec<f64>> {
        let system = self.normal_system(field)?;
        Ok(self.solve_with_alpha(&system, alpha)?.iter().copied().collect())
    }

    /// Sweep α and record the L-curve; failed solves are skipped
    pub fn l_curve(&self, system: &NormalSystem) -> Vec<LCurvePoint> {
        self.config
            .alphas()
            .into_iter()
            .filter_map(|alpha| match self.solve_with_alpha(system, alpha) {
                Ok(x) => Some(LCurvePoint {
                    alpha,
                    residual_norm: system.residual_norm(&x),
                    solution_norm: (&self.roughness_op * &x).norm(),
                }),
                Err(e) => {
                    trace!("alpha={:e} skipped: {}", alpha, e);
                    None
                }
            })
            .collect()
    }

    /// Full inversion for one dataset with L-curve selected α
    pub fn solve(&self, field: &FieldCorrelation) -> Result<ContributionSpectrum> {
        let system = self.normal_system(field)?;

        let l_curve = self.l_curve(&system);
        let corner = select_corner(&l_curve).ok_or_else(|| {
            DlsError::SpectralSolveFailure(format!(
                "L-curve has {} usable points, need at least 3",
                l_curve.len()
            ))
        })?;
        let alpha = l_curve[corner].alpha;
        debug!(
            "Dataset {}: alpha={:e} (corner {} of {})",
            field.dataset,
            alpha,
            corner,
            l_curve.len()
        );

        let x = self.solve_with_alpha(&system, alpha)?;
        if !x.iter().any(|&v| v > 0.0) {
            return Err(DlsError::SpectralSolveFailure("spectrum is identically zero".to_string()));
        }

        Ok(ContributionSpectrum {
            dataset: field.dataset,
            radii_nm: self.grid.radii_nm().to_vec(),
            residual_norm: system.residual_norm(&x),
            weights: x.iter().copied().collect(),
            alpha,
            l_curve,
        })
    }

    /// g1 predicted by a spectrum on an arbitrary lag axis
    pub fn predict(&self, lags_s: &[f64], weights: &[f64]) -> Vec<f64> {
        let x = DVector::from_column_slice(weights);
        (self.kernel(lags_s) * x).iter().copied().collect()
    }
}
