//! Cycle segmentation and correlation analysis
//!
//! 1. Cut one decay cycle out of every batch (peak to right minimum)
//! 2. Deal the cycles into replicate datasets
//! 3. Build g2 and the coherence factor per dataset
//! 4. Invert the Siegert relation to get g1

pub mod correlation;
pub mod segment;
pub mod siegert;

pub use correlation::{AutocorrelationCurve, CorrelationConfig, CorrelationMode};
pub use segment::{Cycle, PeakBounds, SegmenterConfig};
pub use siegert::FieldCorrelation;
