//! Error taxonomy for acquisition and processing
//!
//! Per-unit failures (a line, a batch, a lag, a dataset) are absorbed by the
//! stage that raises them and only shrink the working set of the next stage.
//! `NoValidDatasets` and `DeviceError` are the only ones that reach callers.

use thiserror::Error;

/// Which side of the peak a boundary search ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DlsError {
    /// Device line could not be decoded; skip it
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Batch too short to hold a peak and two minima
    #[error("insufficient samples: need at least 3, got {0}")]
    InsufficientSamples(usize),

    /// No minimum accepted on one side of the peak
    #[error("no {side} boundary found around peak at index {peak}")]
    NoPeakBoundaryFound { side: Side, peak: usize },

    /// Siegert argument negative or not finite at this lag
    #[error("siegert argument {arg} invalid at lag {lag_s:e} s")]
    SiegertDomainError { lag_s: f64, arg: f64 },

    /// Regularized inversion failed for one dataset
    #[error("spectral solve failed: {0}")]
    SpectralSolveFailure(String),

    /// Every dataset failed upstream; nothing to report
    #[error("no valid datasets: every replicate failed before aggregation")]
    NoValidDatasets,

    /// Device unreadable or disconnected; acquisition halted
    #[error("device error: {0}")]
    DeviceError(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DlsError>;
