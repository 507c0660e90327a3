//! Configuration loaded from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::{DeviceSource, SessionConfig};
use crate::error::{DlsError, Result};
use crate::pipeline::PipelineConfig;

/// Sample media with a known viscosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplePreset {
    Silica,
    Polystyrene,
    TitaniumDioxide,
}

impl SamplePreset {
    /// Viscosity in centipoise
    pub fn viscosity_cp(&self) -> f64 {
        match self {
            Self::Silica => 1.2,
            Self::Polystyrene => 0.9,
            Self::TitaniumDioxide => 1.5,
        }
    }
}

impl FromStr for SamplePreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "silica" => Ok(Self::Silica),
            "polystyrene" => Ok(Self::Polystyrene),
            "titaniumdioxide" | "tio2" => Ok(Self::TitaniumDioxide),
            _ => Err(format!("unknown sample {:?}", s)),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Serial device node (already configured by the OS)
    pub device: Option<PathBuf>,

    /// Command whose stdout carries device lines; wins over `device`
    pub device_command: Option<String>,

    /// Recorded raw table to analyze instead of acquiring
    pub input: Option<PathBuf>,

    /// Directory the artifact tables are written to
    pub output_dir: PathBuf,

    /// Intensity samples per device line
    pub batch_len: usize,

    pub duration_secs: u64,

    /// Progress reporting period
    pub interval_secs: u64,

    pub read_timeout_ms: u64,

    pub sample: Option<SamplePreset>,

    pub pipeline: PipelineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring {}={:?}: not a valid value", key, raw);
                default
            }
        },
        None => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable keys take defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let path = |key: &str| lookup(key).filter(|s| !s.trim().is_empty()).map(PathBuf::from);

        let sample = lookup("DLS_SAMPLE").and_then(|s| match s.parse::<SamplePreset>() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Ignoring DLS_SAMPLE: {}", e);
                None
            }
        });

        let mut pipeline = PipelineConfig {
            use_measured_temperature: true,
            ..PipelineConfig::default()
        };

        let optics = &mut pipeline.optics;
        optics.wavelength_nm = parse_or(&lookup, "DLS_WAVELENGTH_NM", optics.wavelength_nm);
        optics.angle_deg = parse_or(&lookup, "DLS_ANGLE_DEG", optics.angle_deg);
        optics.refractive_index = parse_or(&lookup, "DLS_REFRACTIVE_INDEX", optics.refractive_index);
        optics.temperature_c = parse_or(&lookup, "DLS_TEMPERATURE_C", optics.temperature_c);
        // Manual viscosity overrides the preset
        let preset_viscosity = sample.map_or(optics.viscosity_cp, |s| s.viscosity_cp());
        optics.viscosity_cp = parse_or(&lookup, "DLS_VISCOSITY_CP", preset_viscosity);

        pipeline.use_measured_temperature =
            parse_or(&lookup, "DLS_USE_MEASURED_TEMPERATURE", pipeline.use_measured_temperature);

        let grid = &mut pipeline.grid;
        grid.min_radius_nm = parse_or(&lookup, "DLS_GRID_MIN_NM", grid.min_radius_nm);
        grid.max_radius_nm = parse_or(&lookup, "DLS_GRID_MAX_NM", grid.max_radius_nm);
        grid.points = parse_or(&lookup, "DLS_GRID_POINTS", grid.points);

        let corr = &mut pipeline.correlation;
        corr.datasets = parse_or(&lookup, "DLS_DATASETS", corr.datasets);
        corr.mode = parse_or(&lookup, "DLS_CORRELATION_MODE", corr.mode);

        let seg = &mut pipeline.segmenter;
        seg.tolerance = parse_or(&lookup, "DLS_SEG_TOLERANCE", seg.tolerance);
        seg.left_window = parse_or(&lookup, "DLS_SEG_LEFT_WINDOW", seg.left_window);
        seg.left_tolerance_divisor = parse_or(&lookup, "DLS_SEG_LEFT_DIVISOR", seg.left_tolerance_divisor);
        seg.right_window = parse_or(&lookup, "DLS_SEG_RIGHT_WINDOW", seg.right_window);

        let solver = &mut pipeline.solver;
        solver.alpha_min = parse_or(&lookup, "DLS_ALPHA_MIN", solver.alpha_min);
        solver.alpha_max = parse_or(&lookup, "DLS_ALPHA_MAX", solver.alpha_max);
        solver.alpha_count = parse_or(&lookup, "DLS_ALPHA_COUNT", solver.alpha_count);

        let report = &mut pipeline.report;
        report.min_radius_nm = parse_or(&lookup, "DLS_REPORT_MIN_NM", report.min_radius_nm);
        report.max_radius_nm = parse_or(&lookup, "DLS_REPORT_MAX_NM", report.max_radius_nm);

        Self {
            device: path("DLS_DEVICE"),
            device_command: lookup("DLS_DEVICE_COMMAND").filter(|s| !s.trim().is_empty()),
            input: path("DLS_INPUT"),
            output_dir: path("DLS_OUTPUT_DIR").unwrap_or_else(|| PathBuf::from("output")),
            batch_len: parse_or(&lookup, "DLS_BATCH_LEN", 1600),
            duration_secs: parse_or(&lookup, "DLS_DURATION_SECS", 10),
            interval_secs: parse_or(&lookup, "DLS_INTERVAL_SECS", 1),
            read_timeout_ms: parse_or(&lookup, "DLS_READ_TIMEOUT_MS", 1000),
            sample,
            pipeline,
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(DlsError::InvalidConfig(msg.to_string()));

        if self.batch_len < 3 {
            return invalid("DLS_BATCH_LEN must be at least 3");
        }
        if self.input.is_none() {
            if self.device.is_none() && self.device_command.is_none() {
                return invalid("set DLS_DEVICE, DLS_DEVICE_COMMAND or DLS_INPUT");
            }
            if self.duration_secs == 0 || self.interval_secs == 0 || self.read_timeout_ms == 0 {
                return invalid("duration, interval and read timeout must be positive");
            }
        }

        let p = &self.pipeline;
        if p.correlation.datasets == 0 {
            return invalid("DLS_DATASETS must be positive");
        }
        if p.segmenter.left_window == 0 || p.segmenter.right_window == 0 {
            return invalid("segmentation windows must be positive");
        }
        if !(p.segmenter.tolerance >= 0.0 && p.segmenter.left_tolerance_divisor > 0.0) {
            return invalid("segmentation tolerance must be non-negative with a positive divisor");
        }
        if !(p.report.min_radius_nm < p.report.max_radius_nm) {
            return invalid("DLS_REPORT_MIN_NM must be below DLS_REPORT_MAX_NM");
        }
        p.optics.validate()?;
        p.solver.validate()?;
        // Grid bounds are checked when the grid is built, before any acquisition
        crate::inversion::FittingGrid::new(&p.optics, &p.grid)?;
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            batch_len: self.batch_len,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Acquisition source: the command if set, else the device node
    pub fn device_source(&self) -> Option<DeviceSource> {
        self.device_command
            .as_deref()
            .and_then(DeviceSource::command_line)
            .or_else(|| self.device.clone().map(DeviceSource::Serial))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::CorrelationMode;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch_len, 1600);
        assert_eq!(config.duration(), Duration::from_secs(10));
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.pipeline.correlation.datasets, 7);
        assert_eq!(config.pipeline.optics.viscosity_cp, 1.0);
        assert!(config.pipeline.use_measured_temperature);
        assert!(config.device_source().is_none());
        // No source and no input
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sample_preset_and_override() {
        let config = from_pairs(&[("DLS_SAMPLE", "Titanium Dioxide"), ("DLS_DEVICE", "/dev/ttyACM0")]);
        assert_eq!(config.sample, Some(SamplePreset::TitaniumDioxide));
        assert_eq!(config.pipeline.optics.viscosity_cp, 1.5);
        config.validate().unwrap();

        let config = from_pairs(&[("DLS_SAMPLE", "silica"), ("DLS_VISCOSITY_CP", "0.89")]);
        assert_eq!(config.pipeline.optics.viscosity_cp, 0.89);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = from_pairs(&[
            ("DLS_BATCH_LEN", "800"),
            ("DLS_CORRELATION_MODE", "Intensity"),
            ("DLS_ALPHA_COUNT", "lots"),
            ("DLS_INPUT", "run/data_output.csv"),
            ("DLS_USE_MEASURED_TEMPERATURE", "false"),
        ]);
        assert_eq!(config.batch_len, 800);
        assert_eq!(config.pipeline.correlation.mode, CorrelationMode::Intensity);
        assert_eq!(config.pipeline.solver.alpha_count, 50);
        assert!(!config.pipeline.use_measured_temperature);
        config.validate().unwrap();
    }

    #[test]
    fn test_command_wins_over_device() {
        let config = from_pairs(&[
            ("DLS_DEVICE", "/dev/ttyACM0"),
            ("DLS_DEVICE_COMMAND", "cat /dev/ttyUSB1"),
        ]);
        assert!(matches!(config.device_source(), Some(DeviceSource::Command { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_report_range() {
        let config = from_pairs(&[
            ("DLS_INPUT", "x.csv"),
            ("DLS_REPORT_MIN_NM", "100"),
            ("DLS_REPORT_MAX_NM", "10"),
        ]);
        assert!(matches!(config.validate(), Err(DlsError::InvalidConfig(_))));
    }
}
