//! First-order analog prototypes, discretized with the plain bilinear
//! transform `s = 2 fs (1 - z^-1) / (1 + z^-1)`.
//!
//! Each prototype is written as `H(s) = (n1 s + n0) / (d1 s + d0)` with
//! `w0 = 2 pi f0`.
use super::{below_nyquist, finite, positive, DesignError};
use crate::signal::biquad::BiquadCoefficients;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstOrder {
    /// Corner frequency of the prototype.
    pub corner_hz: f64,

    /// Overall gain `K`.
    /// Default: 1
    #[serde(default = "default_gain")]
    pub gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GainLimited {
    /// Corner frequency of the prototype.
    pub corner_hz: f64,

    /// Overall gain `K`.
    /// Default: 1
    #[serde(default = "default_gain")]
    pub gain: f64,

    /// Gain limit `g`: DC gain multiplier for PI, high-frequency gain
    /// multiplier for PD.
    pub gain_limit: f64,
}

fn default_gain() -> f64 {
    1.0
}

fn bilinear(n1: f64, n0: f64, d1: f64, d0: f64, fs: f64) -> BiquadCoefficients {
    let c = 2.0 * fs;
    let a0 = d1 * c + d0;
    BiquadCoefficients {
        b0: (n1 * c + n0) / a0,
        b1: (n0 - n1 * c) / a0,
        b2: 0.0,
        a1: (d0 - d1 * c) / a0,
        a2: 0.0,
    }
}

fn corner(p_corner_hz: f64, gain: f64, fs: f64) -> Result<f64, DesignError> {
    below_nyquist("corner frequency", p_corner_hz, fs)?;
    finite("gain", gain)?;
    Ok(2.0 * PI * p_corner_hz)
}

/// `K / (1 + s/w0)`
pub(super) fn lowpass(p: &FirstOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w0 = corner(p.corner_hz, p.gain, fs)?;
    Ok(bilinear(0.0, p.gain * w0, 1.0, w0, fs))
}

/// `K / (1 + w0/s)`
pub(super) fn highpass(p: &FirstOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w0 = corner(p.corner_hz, p.gain, fs)?;
    Ok(bilinear(p.gain, 0.0, 1.0, w0, fs))
}

/// `K (s/w0 - 1) / (s/w0 + 1)`
pub(super) fn allpass(p: &FirstOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w0 = corner(p.corner_hz, p.gain, fs)?;
    Ok(bilinear(p.gain, -p.gain * w0, 1.0, w0, fs))
}

/// `K (1 + s/w0) / (1/g + s/w0)`
pub(super) fn proportional_integral(
    p: &GainLimited,
    fs: f64,
) -> Result<BiquadCoefficients, DesignError> {
    let w0 = corner(p.corner_hz, p.gain, fs)?;
    positive("gain_limit", p.gain_limit)?;
    Ok(bilinear(p.gain, p.gain * w0, 1.0, w0 / p.gain_limit, fs))
}

/// `K (1 + s/w0) / (1 + s/(w0 g))`
pub(super) fn proportional_derivative(
    p: &GainLimited,
    fs: f64,
) -> Result<BiquadCoefficients, DesignError> {
    let w0 = corner(p.corner_hz, p.gain, fs)?;
    positive("gain_limit", p.gain_limit)?;
    let g = p.gain_limit;
    Ok(bilinear(p.gain * g, p.gain * g * w0, 1.0, g * w0, fs))
}
