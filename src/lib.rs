//! DLS capture - photon-correlation acquisition and particle sizing
//!
//! Reads batches of photon intensities from the instrument, reassembles them
//! into one session trace, cuts a decay cycle from every batch, builds g2 per
//! replicate dataset, and inverts it into a hydrodynamic size spectrum.

pub mod config;
pub mod decoder;
pub mod device;
pub mod dsp;
pub mod error;
pub mod inversion;
pub mod pipeline;
pub mod report;

pub use error::{DlsError, Result};
