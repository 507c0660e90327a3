//! Scattering geometry and the hydrodynamic-radius fitting grid

use serde::{Deserialize, Serialize};

use crate::error::{DlsError, Result};

/// Boltzmann constant, J/K
pub const BOLTZMANN: f64 = 1.380_649e-23;

const ZERO_CELSIUS_K: f64 = 273.15;

/// Optical and medium parameters of one run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Optics {
    pub wavelength_nm: f64,
    pub angle_deg: f64,
    pub refractive_index: f64,
    /// Dynamic viscosity of the medium, centipoise (mPa·s)
    pub viscosity_cp: f64,
    pub temperature_c: f64,
}

impl Default for Optics {
    fn default() -> Self {
        Self {
            wavelength_nm: 635.0,
            angle_deg: 90.0,
            refractive_index: 1.33,
            viscosity_cp: 1.0,
            temperature_c: 25.0,
        }
    }
}

impl Optics {
    /// Bragg wave vector magnitude q = 4πn·sin(θ/2)/λ, 1/m
    pub fn scattering_vector(&self) -> f64 {
        let half_angle = self.angle_deg.to_radians() / 2.0;
        4.0 * std::f64::consts::PI * self.refractive_index * half_angle.sin()
            / (self.wavelength_nm * 1e-9)
    }

    fn thermal_drag_ratio(&self) -> f64 {
        let kelvin = self.temperature_c + ZERO_CELSIUS_K;
        let viscosity_pa_s = self.viscosity_cp * 1e-3;
        BOLTZMANN * kelvin / (6.0 * std::f64::consts::PI * viscosity_pa_s)
    }

    /// Stokes–Einstein diffusion coefficient for a sphere, m²/s
    pub fn diffusion_coefficient(&self, radius_nm: f64) -> f64 {
        self.thermal_drag_ratio() / (radius_nm * 1e-9)
    }

    /// Field correlation decay rate Γ = D·q², 1/s
    pub fn decay_rate(&self, radius_nm: f64) -> f64 {
        let q = self.scattering_vector();
        self.diffusion_coefficient(radius_nm) * q * q
    }

    /// Inverse of `decay_rate`
    pub fn radius_for_decay_rate(&self, gamma: f64) -> f64 {
        let q = self.scattering_vector();
        self.thermal_drag_ratio() * q * q / gamma * 1e9
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("wavelength", self.wavelength_nm),
            ("refractive index", self.refractive_index),
            ("viscosity", self.viscosity_cp),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(DlsError::InvalidConfig(format!("{} must be positive, got {}", name, v)));
            }
        }
        if !(self.angle_deg > 0.0 && self.angle_deg < 180.0) {
            return Err(DlsError::InvalidConfig(format!(
                "scattering angle must lie in (0, 180) degrees, got {}",
                self.angle_deg
            )));
        }
        if !(self.temperature_c + ZERO_CELSIUS_K > 0.0) {
            return Err(DlsError::InvalidConfig(format!(
                "temperature {} C is below absolute zero",
                self.temperature_c
            )));
        }
        Ok(())
    }
}

/// Grid bounds and resolution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub min_radius_nm: f64,
    pub max_radius_nm: f64,
    pub points: usize,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min_radius_nm: 0.09,
            max_radius_nm: 1e6,
            points: 200,
        }
    }
}

/// Log-spaced radii and their decay rates; fixed for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittingGrid {
    radii_nm: Vec<f64>,
    decay_rates: Vec<f64>,
}

impl FittingGrid {
    pub fn new(optics: &Optics, spec: &GridSpec) -> Result<Self> {
        optics.validate()?;
        if spec.points < 2 {
            return Err(DlsError::InvalidConfig("fitting grid needs at least 2 points".to_string()));
        }
        if !(spec.min_radius_nm > 0.0 && spec.max_radius_nm > spec.min_radius_nm) {
            return Err(DlsError::InvalidConfig(format!(
                "fitting grid bounds must satisfy 0 < min < max, got {} .. {}",
                spec.min_radius_nm, spec.max_radius_nm
            )));
        }

        let lo = spec.min_radius_nm.log10();
        let hi = spec.max_radius_nm.log10();
        let last = (spec.points - 1) as f64;
        let radii_nm: Vec<f64> = (0..spec.points)
            .map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / last))
            .collect();
        let decay_rates = radii_nm.iter().map(|&r| optics.decay_rate(r)).collect();

        Ok(Self {
            radii_nm,
            decay_rates,
        })
    }

    pub fn len(&self) -> usize {
        self.radii_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radii_nm.is_empty()
    }

    pub fn radii_nm(&self) -> &[f64] {
        &self.radii_nm
    }

    pub fn decay_rates(&self) -> &[f64] {
        &self.decay_rates
    }
}
