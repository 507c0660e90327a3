//! Persisted artifact tables
//!
//! Plain comma-separated files with fixed headers. The raw table is written
//! while acquiring and flushed per frame, so a stopped or crashed session
//! still leaves every accepted row on disk.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::decoder::TimeSample;
use crate::dsp::correlation::aligned_traces;
use crate::dsp::Cycle;
use crate::error::{DlsError, Result};
use crate::inversion::ContributionSpectrum;
use crate::pipeline::AutocorrelationFit;

pub const RAW_TABLE: &str = "data_output.csv";
pub const CYCLES_TABLE: &str = "subsets.csv";

pub const RAW_HEADER: &str = "Time(microseconds),DLS Value,Temperature(C)";
pub const CONTRIBUTIONS_HEADER: &str = "Radius(nm),Contribution,Diameter(nm)";
pub const AUTOCORRELATION_HEADER: &str =
    "Time(seconds),Predicted g1,Predicted g2,Measured g1,Measured g2";

pub fn contributions_file_name(dataset: usize) -> String {
    format!("contributions_data_set_{}.csv", dataset)
}

pub fn autocorrelation_file_name(dataset: usize) -> String {
    format!("autocorrelation_data_set_{}.csv", dataset)
}

fn optional(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// Append-only writer for the raw sample table
pub struct RawTableWriter<W: Write> {
    out: W,
    rows: u64,
}

impl RawTableWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> RawTableWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "{}", RAW_HEADER)?;
        out.flush()?;
        Ok(Self { out, rows: 0 })
    }

    /// Write one frame's samples and flush
    pub fn write_samples(&mut self, samples: &[TimeSample]) -> Result<()> {
        for s in samples {
            writeln!(
                self.out,
                "{},{},{}",
                s.timestamp_us,
                s.intensity,
                optional(s.temperature_c)
            )?;
        }
        self.out.flush()?;
        self.rows += samples.len() as u64;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, line_no: usize, name: &str) -> Result<T> {
    field
        .map(str::trim)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| DlsError::MalformedFrame(format!("raw table line {}: bad {}", line_no, name)))
}

/// Read a raw table written by `RawTableWriter`
pub fn read_raw_table<R: BufRead>(reader: R) -> Result<Vec<TimeSample>> {
    let mut lines = reader.lines();
    let header = lines.next().transpose()?.unwrap_or_default();
    if header.trim() != RAW_HEADER {
        return Err(DlsError::MalformedFrame(format!(
            "raw table must start with {:?}",
            RAW_HEADER
        )));
    }

    let mut samples = Vec::new();
    for (k, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = k + 2;
        let mut fields = line.split(',');
        let timestamp_us = parse_field(fields.next(), line_no, "timestamp")?;
        let intensity = parse_field(fields.next(), line_no, "intensity")?;
        let temperature_c = match fields.next().map(str::trim) {
            None | Some("") => None,
            Some(t) => Some(parse_field(Some(t), line_no, "temperature")?),
        };
        samples.push(TimeSample {
            timestamp_us,
            intensity,
            temperature_c,
        });
    }
    Ok(samples)
}

pub fn read_raw_table_file(path: &Path) -> Result<Vec<TimeSample>> {
    read_raw_table(BufReader::new(File::open(path)?))
}

/// Peak-aligned cycles side by side, one column per cycle
///
/// Shorter cycles are padded with their own minimum; time runs from the
/// peak in steps of the mean sample step.
pub fn write_cycles_table<W: Write>(mut out: W, cycles: &[Cycle]) -> Result<()> {
    let mut header = String::from("Time(microseconds)");
    for k in 0..cycles.len() {
        header.push_str(&format!(",data_set_{}", k));
    }
    writeln!(out, "{}", header)?;

    if !cycles.is_empty() {
        let step_us = cycles.iter().map(|c| c.step_us).sum::<f64>() / cycles.len() as f64;
        let traces = aligned_traces(cycles);
        let rows = traces.first().map_or(0, Vec::len);
        for j in 0..rows {
            let mut row = (j as f64 * step_us).to_string();
            for trace in &traces {
                row.push_str(&format!(",{}", trace[j]));
            }
            writeln!(out, "{}", row)?;
        }
    }
    out.flush()?;
    Ok(())
}

pub fn write_contributions_table<W: Write>(mut out: W, spectrum: &ContributionSpectrum) -> Result<()> {
    writeln!(out, "{}", CONTRIBUTIONS_HEADER)?;
    for (&r, &w) in spectrum.radii_nm.iter().zip(&spectrum.weights) {
        writeln!(out, "{},{},{}", r, w, 2.0 * r)?;
    }
    out.flush()?;
    Ok(())
}

/// Measured against predicted correlation; lags dropped by the Siegert step
/// leave the measured g1 cell empty
pub fn write_autocorrelation_table<W: Write>(mut out: W, fit: &AutocorrelationFit) -> Result<()> {
    writeln!(out, "{}", AUTOCORRELATION_HEADER)?;
    for j in 0..fit.lags_s.len() {
        writeln!(
            out,
            "{},{},{},{},{}",
            fit.lags_s[j],
            fit.predicted_g1[j],
            fit.predicted_g2[j],
            optional(fit.measured_g1[j]),
            fit.measured_g2[j]
        )?;
    }
    out.flush()?;
    Ok(())
}
