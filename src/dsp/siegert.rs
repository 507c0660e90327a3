//! Siegert inversion: g2(τ) = 1 + β·g1(τ)²

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::correlation::AutocorrelationCurve;
use crate::error::{DlsError, Result};

/// First-order correlation recovered for one dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCorrelation {
    pub dataset: usize,
    pub lags_s: Vec<f64>,
    pub g1: Vec<f64>,
    /// Position of each kept lag in the source g2 curve
    pub source_index: Vec<usize>,
    /// Lags dropped for a negative Siegert argument
    pub excluded: usize,
}

impl FieldCorrelation {
    pub fn len(&self) -> usize {
        self.g1.len()
    }

    pub fn is_empty(&self) -> bool {
        self.g1.is_empty()
    }
}

/// g1 at one lag, or `SiegertDomainError` when (g2 - 1)/β is negative
pub fn siegert_point(lag_s: f64, g2: f64, beta: f64) -> Result<f64> {
    let arg = (g2 - 1.0) / beta;
    if !arg.is_finite() || arg < 0.0 {
        return Err(DlsError::SiegertDomainError { lag_s, arg });
    }
    Ok(arg.sqrt())
}

/// Convert a dataset's g2 curve to g1, dropping invalid lags
pub fn invert(curve: &AutocorrelationCurve) -> FieldCorrelation {
    let mut lags_s = Vec::with_capacity(curve.len());
    let mut g1 = Vec::with_capacity(curve.len());
    let mut source_index = Vec::with_capacity(curve.len());
    let mut excluded = 0;

    for (j, (&lag, &g2)) in curve.lags_s.iter().zip(&curve.g2).enumerate() {
        match siegert_point(lag, g2, curve.beta) {
            Ok(v) => {
                lags_s.push(lag);
                g1.push(v);
                source_index.push(j);
            }
            Err(e) => {
                trace!("Dataset {}: {}", curve.dataset, e);
                excluded += 1;
            }
        }
    }

    FieldCorrelation {
        dataset: curve.dataset,
        lags_s,
        g1,
        source_index,
        excluded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_point_is_exact() {
        assert_eq!(siegert_point(0.0, 2.0, 1.0).unwrap(), 1.0);
    }

    #[test]
    fn test_negative_argument_rejected() {
        let err = siegert_point(1e-3, 0.97, 0.6).unwrap_err();
        assert!(matches!(err, DlsError::SiegertDomainError { .. }));
        assert!(siegert_point(0.0, 1.5, 0.0).is_err());
    }

    #[test]
    fn test_invert_drops_noisy_tail() {
        let curve = AutocorrelationCurve {
            dataset: 4,
            lags_s: vec![0.0, 1e-5, 2e-5, 3e-5, 4e-5],
            g2: vec![1.8, 1.2, 0.99, 1.0, 0.95],
            beta: 0.8,
            cycles: 1,
        };
        let field = invert(&curve);
        assert_eq!(field.dataset, 4);
        assert_eq!(field.len(), 3);
        assert_eq!(field.excluded, 2);
        assert_eq!(field.source_index, vec![0, 1, 3]);
        assert_eq!(field.lags_s, vec![0.0, 1e-5, 3e-5]);
        assert!((field.g1[0] - 1.0).abs() < 1e-12);
        assert!((field.g1[1] - 0.5).abs() < 1e-12);
        assert_eq!(field.g1[2], 0.0);
        assert!(field.g1.iter().all(|v| *v >= 0.0));
    }
}
