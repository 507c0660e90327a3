//! Size-spectrum inversion
//!
//! Physics grid (Stokes–Einstein decay rates), the NNLS core and the
//! L-curve driven Tikhonov solver.

pub mod grid;
pub mod nnls;
pub mod solver;

pub use grid::{FittingGrid, GridSpec, Optics};
pub use solver::{ContributionSpectrum, LCurvePoint, SolverConfig, SpectralSolver};
