//! Dominant size per dataset and the run average

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{DlsError, Result};
use crate::inversion::ContributionSpectrum;

/// Radius window the dominant peak is searched in
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportRange {
    pub min_radius_nm: f64,
    pub max_radius_nm: f64,
}

impl Default for ReportRange {
    fn default() -> Self {
        Self {
            min_radius_nm: 1.0,
            max_radius_nm: 5000.0,
        }
    }
}

impl ReportRange {
    pub fn contains(&self, radius_nm: f64) -> bool {
        radius_nm >= self.min_radius_nm && radius_nm <= self.max_radius_nm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetSize {
    pub dataset: usize,
    pub peak_index: usize,
    pub radius_nm: f64,
    pub diameter_nm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeResult {
    pub datasets: Vec<DatasetSize>,
    pub average_diameter_nm: f64,
    /// Datasets that produced no usable peak
    pub excluded: Vec<usize>,
}

/// First strongest grid point inside `range`; `None` if nothing there is positive
pub fn dominant_size(spectrum: &ContributionSpectrum, range: &ReportRange) -> Option<DatasetSize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, (&r, &w)) in spectrum.radii_nm.iter().zip(&spectrum.weights).enumerate() {
        if !range.contains(r) || !(w > 0.0) {
            continue;
        }
        if best.map_or(true, |(_, bw)| w > bw) {
            best = Some((i, w));
        }
    }

    best.map(|(i, _)| {
        let radius_nm = spectrum.radii_nm[i];
        DatasetSize {
            dataset: spectrum.dataset,
            peak_index: i,
            radius_nm,
            diameter_nm: 2.0 * radius_nm,
        }
    })
}

/// Reduce the spectra to one size per dataset and their mean
///
/// `excluded` carries datasets dropped upstream; datasets whose spectrum has
/// no peak in range are appended to it.
pub fn aggregate(
    spectra: &[ContributionSpectrum],
    range: &ReportRange,
    mut excluded: Vec<usize>,
) -> Result<SizeResult> {
    let mut datasets = Vec::with_capacity(spectra.len());
    for spectrum in spectra {
        match dominant_size(spectrum, range) {
            Some(size) => datasets.push(size),
            None => {
                debug!(
                    "Dataset {}: no peak between {} and {} nm",
                    spectrum.dataset, range.min_radius_nm, range.max_radius_nm
                );
                excluded.push(spectrum.dataset);
            }
        }
    }
    excluded.sort_unstable();
    excluded.dedup();

    if datasets.is_empty() {
        return Err(DlsError::NoValidDatasets);
    }

    let average_diameter_nm =
        datasets.iter().map(|d| d.diameter_nm).sum::<f64>() / datasets.len() as f64;

    info!(
        "[Result] average diameter {:.2} nm over {} dataset(s), {} excluded",
        average_diameter_nm,
        datasets.len(),
        excluded.len()
    );

    Ok(SizeResult {
        datasets,
        average_diameter_nm,
        excluded,
    })
}
