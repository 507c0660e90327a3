//! Run summary written next to the tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::tables::{
    autocorrelation_file_name, contributions_file_name, write_autocorrelation_table,
    write_contributions_table, write_cycles_table, CYCLES_TABLE,
};
use crate::error::Result;
use crate::inversion::Optics;
use crate::pipeline::PipelineOutput;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset: usize,
    /// `None` when the spectrum had no peak in the report range
    pub diameter_nm: Option<f64>,
    pub alpha: f64,
    pub beta: f64,
    pub residual_norm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub measured_at: DateTime<Utc>,
    pub batches: usize,
    pub cycles: usize,
    pub rejected_batches: Vec<usize>,
    pub optics: Optics,
    pub average_diameter_nm: f64,
    pub excluded_datasets: Vec<usize>,
    pub datasets: Vec<DatasetSummary>,
}

impl RunSummary {
    pub fn new(output: &PipelineOutput, batches: usize, measured_at: DateTime<Utc>) -> Self {
        let datasets = output
            .spectra
            .iter()
            .zip(&output.fits)
            .map(|(spectrum, fit)| DatasetSummary {
                dataset: spectrum.dataset,
                diameter_nm: output
                    .result
                    .datasets
                    .iter()
                    .find(|d| d.dataset == spectrum.dataset)
                    .map(|d| d.diameter_nm),
                alpha: spectrum.alpha,
                beta: fit.beta,
                residual_norm: spectrum.residual_norm,
            })
            .collect();

        Self {
            measured_at,
            batches,
            cycles: output.cycles.len(),
            rejected_batches: output.rejected_batches.clone(),
            optics: output.optics,
            average_diameter_nm: output.result.average_diameter_nm,
            excluded_datasets: output.result.excluded.clone(),
            datasets,
        }
    }
}

fn create(dir: &Path, name: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(name))?))
}

/// Write the cycles, per-dataset tables and summary; returns the paths written
pub fn write_run(dir: &Path, output: &PipelineOutput, summary: &RunSummary) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    write_cycles_table(create(dir, CYCLES_TABLE)?, &output.cycles)?;
    written.push(dir.join(CYCLES_TABLE));

    for spectrum in &output.spectra {
        let name = contributions_file_name(spectrum.dataset);
        write_contributions_table(create(dir, &name)?, spectrum)?;
        written.push(dir.join(name));
    }
    for fit in &output.fits {
        let name = autocorrelation_file_name(fit.dataset);
        write_autocorrelation_table(create(dir, &name)?, fit)?;
        written.push(dir.join(name));
    }

    let mut out = create(dir, SUMMARY_FILE)?;
    serde_json::to_writer_pretty(&mut out, summary).map_err(std::io::Error::from)?;
    out.flush()?;
    written.push(dir.join(SUMMARY_FILE));

    info!("Wrote {} artifact(s) to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inversion::ContributionSpectrum;
    use crate::pipeline::AutocorrelationFit;
    use crate::report::{DatasetSize, SizeResult};

    fn output() -> PipelineOutput {
        PipelineOutput {
            optics: Optics::default(),
            cycles: vec![],
            rejected_batches: vec![4],
            spectra: vec![ContributionSpectrum {
                dataset: 2,
                radii_nm: vec![10.0, 20.0],
                weights: vec![0.1, 0.9],
                alpha: 0.01,
                residual_norm: 0.002,
                l_curve: vec![],
            }],
            fits: vec![AutocorrelationFit {
                dataset: 2,
                beta: 0.6,
                lags_s: vec![0.0],
                measured_g2: vec![1.6],
                measured_g1: vec![Some(1.0)],
                predicted_g1: vec![1.0],
                predicted_g2: vec![1.6],
            }],
            result: SizeResult {
                datasets: vec![DatasetSize {
                    dataset: 2,
                    peak_index: 1,
                    radius_nm: 20.0,
                    diameter_nm: 40.0,
                }],
                average_diameter_nm: 40.0,
                excluded: vec![0, 1],
            },
        }
    }

    #[test]
    fn test_summary_fields() {
        let summary = RunSummary::new(&output(), 5, Utc::now());
        assert_eq!(summary.batches, 5);
        assert_eq!(summary.datasets[0].diameter_nm, Some(40.0));
        assert_eq!(summary.datasets[0].beta, 0.6);
        assert_eq!(summary.excluded_datasets, vec![0, 1]);
    }

    #[test]
    fn test_write_run() {
        let dir = tempfile::tempdir().unwrap();
        let out = output();
        let summary = RunSummary::new(&out, 5, Utc::now());
        let written = write_run(dir.path(), &out, &summary).unwrap();
        assert_eq!(written.len(), 4);
        assert!(dir.path().join("contributions_data_set_2.csv").exists());
        assert!(dir.path().join("autocorrelation_data_set_2.csv").exists());

        let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        let back: RunSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(back.average_diameter_nm, 40.0);
        assert_eq!(back.rejected_batches, vec![4]);
    }
}
