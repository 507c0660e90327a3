//! Device line decoder
//!
//! The microcontroller emits one comma-separated line per batch:
//! `I0,I1,...,I(N-1),ELAPSED_US[,TEMP_C]`
//! N is fixed per protocol revision (800 or 1600 so far) and the temperature
//! field is only present on boards fitted with the probe.

use serde::{Deserialize, Serialize};

use crate::error::{DlsError, Result};

/// Protocol layout for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    /// Intensity samples per batch (N)
    pub batch_len: usize,
}

impl FrameLayout {
    pub fn new(batch_len: usize) -> Self {
        Self { batch_len }
    }

    /// Field count without the temperature field
    pub fn fields_without_temperature(&self) -> usize {
        self.batch_len + 1
    }

    /// Field count with the temperature field
    pub fn fields_with_temperature(&self) -> usize {
        self.batch_len + 2
    }
}

/// One validated batch from the instrument
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub intensities: Vec<i32>,
    /// Time the board took to sample the whole batch, microseconds
    pub elapsed_us: u64,
    pub temperature_c: Option<f64>,
}

impl RawFrame {
    /// Average time between two samples of this batch, microseconds
    pub fn step_us(&self) -> f64 {
        self.elapsed_us as f64 / self.intensities.len() as f64
    }

    pub fn len(&self) -> usize {
        self.intensities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intensities.is_empty()
    }
}

/// Stateless line parser
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    layout: FrameLayout,
}

impl FrameDecoder {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Parse one device line into a frame
    ///
    /// Any deviation from the protocol yields `MalformedFrame`; callers skip
    /// the line and keep reading.
    pub fn decode(&self, line: &str) -> Result<RawFrame> {
        let line = line.trim();
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();

        let n = self.layout.batch_len;
        let has_temperature = if fields.len() == self.layout.fields_with_temperature() {
            true
        } else if fields.len() == self.layout.fields_without_temperature() {
            false
        } else {
            return Err(DlsError::MalformedFrame(format!(
                "expected {} or {} fields, got {}",
                self.layout.fields_without_temperature(),
                self.layout.fields_with_temperature(),
                fields.len()
            )));
        };

        let intensities = fields[..n]
            .iter()
            .enumerate()
            .map(|(i, f)| {
                f.parse::<i32>().map_err(|_| {
                    DlsError::MalformedFrame(format!("intensity {} is not an integer: {:?}", i, f))
                })
            })
            .collect::<Result<Vec<i32>>>()?;

        let elapsed_us = fields[n].parse::<u64>().map_err(|_| {
            DlsError::MalformedFrame(format!("elapsed time is not an integer: {:?}", fields[n]))
        })?;

        // Below 1 us per sample the integer timestamps would collide
        if elapsed_us < n as u64 {
            return Err(DlsError::MalformedFrame(format!(
                "elapsed time {} us too short for {} samples",
                elapsed_us, n
            )));
        }

        let temperature_c = if has_temperature {
            let t = fields[n + 1].parse::<f64>().map_err(|_| {
                DlsError::MalformedFrame(format!("temperature is not a number: {:?}", fields[n + 1]))
            })?;
            if !t.is_finite() {
                return Err(DlsError::MalformedFrame("temperature is not finite".to_string()));
            }
            Some(t)
        } else {
            None
        };

        Ok(RawFrame {
            intensities,
            elapsed_us,
            temperature_c,
        })
    }
}

/// Decode raw serial bytes as ISO-8859-1 (every byte maps to one char)
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, elapsed: u64, temp: Option<f64>) -> String {
        let mut fields: Vec<String> = (0..n).map(|i| (100 + i % 7).to_string()).collect();
        fields.push(elapsed.to_string());
        if let Some(t) = temp {
            fields.push(t.to_string());
        }
        fields.join(",")
    }

    #[test]
    fn test_decode_with_temperature() {
        let decoder = FrameDecoder::new(FrameLayout::new(800));
        let frame = decoder.decode(&line(800, 7055, Some(23.5))).unwrap();
        assert_eq!(frame.len(), 800);
        assert_eq!(frame.elapsed_us, 7055);
        assert_eq!(frame.temperature_c, Some(23.5));
        assert_eq!(frame.intensities[3], 103);
    }

    #[test]
    fn test_decode_without_temperature_and_crlf() {
        let decoder = FrameDecoder::new(FrameLayout::new(1600));
        let text = format!("{}\r\n", line(1600, 14110, None));
        let frame = decoder.decode(&text).unwrap();
        assert_eq!(frame.len(), 1600);
        assert_eq!(frame.temperature_c, None);
        assert!((frame.step_us() - 14110.0 / 1600.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_wrong_arity() {
        for &n in &[800usize, 1600] {
            let decoder = FrameDecoder::new(FrameLayout::new(n));
            for count in [0usize, 1, n - 1, n, n + 3, 2 * n] {
                let fields: Vec<String> = (0..count).map(|_| "2000".to_string()).collect();
                let result = decoder.decode(&fields.join(","));
                assert!(
                    matches!(result, Err(DlsError::MalformedFrame(_))),
                    "n={} count={} should be rejected",
                    n,
                    count
                );
            }
        }
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let decoder = FrameDecoder::new(FrameLayout::new(4));
        assert!(decoder.decode("1,2,x,4,100").is_err());
        assert!(decoder.decode("1,2,3,4,-100").is_err());
        assert!(decoder.decode("1,2,3,4,100,warm").is_err());
        assert!(decoder.decode("1,2,3,4,100,NaN").is_err());
    }

    #[test]
    fn test_rejects_zero_and_short_elapsed() {
        let decoder = FrameDecoder::new(FrameLayout::new(4));
        assert!(decoder.decode("1,2,3,4,0").is_err());
        assert!(decoder.decode("1,2,3,4,3").is_err());
        assert!(decoder.decode("1,2,3,4,4").is_ok());
    }

    #[test]
    fn test_latin1() {
        assert_eq!(latin1_to_string(b"12,34\xb0"), "12,34\u{b0}");
    }
}
