//! Non-negative least squares (Lawson–Hanson active set)
//!
//! Works on the normal equations: given G = AᵀA and h = Aᵀb, find x ≥ 0
//! minimizing ½xᵀGx − hᵀx. Tikhonov terms are folded into G by the caller,
//! so one Gram matrix serves a whole regularization sweep.

use nalgebra::{DMatrix, DVector};

use crate::error::{DlsError, Result};

/// Relative cutoff for singular values in the passive-set solve
const SINGULAR_CUTOFF: f64 = 1e-13;

/// Solve the passive subsystem G_PP z = h_P by pseudo-inverse
fn solve_passive(gram: &DMatrix<f64>, rhs: &DVector<f64>, passive: &[usize]) -> Result<DVector<f64>> {
    let sub = gram.select_rows(passive).select_columns(passive);
    let h = DVector::from_iterator(passive.len(), passive.iter().map(|&i| rhs[i]));

    let svd = sub.svd(true, true);
    let cutoff = SINGULAR_CUTOFF * svd.singular_values.max();
    svd.solve(&h, cutoff)
        .map_err(|e| DlsError::SpectralSolveFailure(format!("passive-set solve: {}", e)))
}

/// Non-negative minimizer of ½xᵀGx − hᵀx
///
/// `max_iterations` bounds the inner (passive-set) solves; running out is
/// reported as a convergence failure.
pub fn nnls_gram(gram: &DMatrix<f64>, rhs: &DVector<f64>, max_iterations: usize) -> Result<DVector<f64>> {
    let n = gram.ncols();
    if gram.nrows() != n || rhs.len() != n {
        return Err(DlsError::SpectralSolveFailure(format!(
            "dimension mismatch: gram {}x{}, rhs {}",
            gram.nrows(),
            n,
            rhs.len()
        )));
    }
    if gram.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return Err(DlsError::SpectralSolveFailure("non-finite input".to_string()));
    }

    let mut x = DVector::<f64>::zeros(n);
    let mut passive = vec![false; n];
    // Indices that were just added and immediately dropped again
    let mut blocked = vec![false; n];
    let tol = 10.0 * f64::EPSILON * gram.amax().max(rhs.amax()) * n as f64;
    let mut iterations = 0;

    loop {
        let w = rhs - gram * &x;

        let candidate = (0..n)
            .filter(|&i| !passive[i] && !blocked[i] && w[i] > tol)
            .max_by(|&a, &b| w[a].total_cmp(&w[b]));
        let Some(t) = candidate else {
            break;
        };
        passive[t] = true;

        loop {
            iterations += 1;
            if iterations > max_iterations {
                return Err(DlsError::SpectralSolveFailure(format!(
                    "no convergence after {} iterations",
                    max_iterations
                )));
            }

            let idx: Vec<usize> = (0..n).filter(|&i| passive[i]).collect();
            if idx.is_empty() {
                break;
            }
            let z = solve_passive(gram, rhs, &idx)?;

            if z.iter().all(|&v| v > 0.0) {
                x.fill(0.0);
                for (k, &i) in idx.iter().enumerate() {
                    x[i] = z[k];
                }
                break;
            }

            // Step from x towards z until the first passive entry hits zero
            let mut step = f64::INFINITY;
            let mut limiting = idx[0];
            for (k, &i) in idx.iter().enumerate() {
                if z[k] <= 0.0 {
                    let denom = x[i] - z[k];
                    let ratio = if denom > 0.0 { x[i] / denom } else { 0.0 };
                    if ratio < step {
                        step = ratio;
                        limiting = i;
                    }
                }
            }
            for (k, &i) in idx.iter().enumerate() {
                x[i] += step * (z[k] - x[i]);
            }
            x[limiting] = 0.0;
            for &i in &idx {
                if x[i] <= tol {
                    x[i] = 0.0;
                    passive[i] = false;
                }
            }
        }

        if passive[t] {
            blocked.fill(false);
        } else {
            blocked[t] = true;
        }
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_equations(a: &DMatrix<f64>, b: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
        (a.transpose() * a, a.transpose() * b)
    }

    #[test]
    fn test_unconstrained_optimum_inside_orthant() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let (g, h) = normal_equations(&a, &b);
        let x = nnls_gram(&g, &h, 100).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_clamps_negative_component() {
        // Unconstrained solution is (2, -1); the constrained one is (0.5, 0)
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 2.0]);
        let b = DVector::from_vec(vec![1.0, 0.0]);
        let (g, h) = normal_equations(&a, &b);
        let x = nnls_gram(&g, &h, 100).unwrap();
        assert!(x.iter().all(|&v| v >= 0.0));
        assert!((x[1]).abs() < 1e-12);
        // min over x0 of (x0 - 1)^2 + x0^2 -> x0 = 0.5
        assert!((x[0] - 0.5).abs() < 1e-10, "x={}", x);
    }

    #[test]
    fn test_all_negative_target_gives_zero() {
        let a = DMatrix::<f64>::identity(3, 3);
        let b = DVector::from_vec(vec![-1.0, -2.0, -0.5]);
        let (g, h) = normal_equations(&a, &b);
        let x = nnls_gram(&g, &h, 100).unwrap();
        assert_eq!(x, DVector::zeros(3));
    }

    #[test]
    fn test_iteration_limit() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let (g, h) = normal_equations(&a, &b);
        assert!(matches!(
            nnls_gram(&g, &h, 1),
            Err(DlsError::SpectralSolveFailure(_))
        ));
    }

    #[test]
    fn test_rejects_nan() {
        let g = DMatrix::from_element(2, 2, f64::NAN);
        let h = DVector::from_element(2, 1.0);
        assert!(nnls_gram(&g, &h, 10).is_err());
    }
}
