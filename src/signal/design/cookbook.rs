//! Second-order sections from the Audio EQ Cookbook (bilinear transform with
//! frequency pre-warping).
use super::{below_nyquist, finite, positive, DesignError};
use crate::signal::biquad::BiquadCoefficients;
use serde::Deserialize;
use serde::Serialize;
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondOrder {
    /// Cutoff (low/high-pass) or centre (band-pass, notch, all-pass) frequency.
    pub frequency_hz: f64,

    /// Quality factor.
    /// Default: 1/sqrt(2)
    #[serde(default = "default_q")]
    pub q: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equalizer {
    /// Centre (peak) or corner (shelf) frequency.
    pub frequency_hz: f64,

    /// Quality factor.
    /// Default: 1/sqrt(2)
    #[serde(default = "default_q")]
    pub q: f64,

    /// Boost (positive) or cut (negative) in decibels.
    pub gain_db: f64,
}

fn default_q() -> f64 {
    std::f64::consts::FRAC_1_SQRT_2
}

/// Shared intermediate terms.
struct Warp {
    cos: f64,
    sin: f64,
    alpha: f64,
}

fn warp(frequency_hz: f64, q: f64, fs: f64) -> Result<Warp, DesignError> {
    below_nyquist("frequency", frequency_hz, fs)?;
    positive("q", q)?;
    let omega = 2.0 * PI * frequency_hz / fs;
    let (sin, cos) = omega.sin_cos();
    Ok(Warp {
        cos,
        sin,
        alpha: sin / (2.0 * q),
    })
}

pub(super) fn lowpass(p: &SecondOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w = warp(p.frequency_hz, p.q, fs)?;
    let b1 = 1.0 - w.cos;
    Ok(BiquadCoefficients::normalized(
        [b1 / 2.0, b1, b1 / 2.0],
        [1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha],
    ))
}

pub(super) fn highpass(p: &SecondOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w = warp(p.frequency_hz, p.q, fs)?;
    let b0 = (1.0 + w.cos) / 2.0;
    Ok(BiquadCoefficients::normalized(
        [b0, -(1.0 + w.cos), b0],
        [1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha],
    ))
}

/// Constant 0 dB peak gain.
pub(super) fn bandpass(p: &SecondOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w = warp(p.frequency_hz, p.q, fs)?;
    Ok(BiquadCoefficients::normalized(
        [w.alpha, 0.0, -w.alpha],
        [1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha],
    ))
}

pub(super) fn notch(p: &SecondOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w = warp(p.frequency_hz, p.q, fs)?;
    Ok(BiquadCoefficients::normalized(
        [1.0, -2.0 * w.cos, 1.0],
        [1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha],
    ))
}

pub(super) fn allpass(p: &SecondOrder, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    let w = warp(p.frequency_hz, p.q, fs)?;
    Ok(BiquadCoefficients::normalized(
        [1.0 - w.alpha, -2.0 * w.cos, 1.0 + w.alpha],
        [1.0 + w.alpha, -2.0 * w.cos, 1.0 - w.alpha],
    ))
}

pub(super) fn peak(p: &Equalizer, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    finite("gain_db", p.gain_db)?;
    let w = warp(p.frequency_hz, p.q, fs)?;
    let a = 10f64.powf(p.gain_db / 40.0);
    Ok(BiquadCoefficients::normalized(
        [1.0 + w.alpha * a, -2.0 * w.cos, 1.0 - w.alpha * a],
        [1.0 + w.alpha / a, -2.0 * w.cos, 1.0 - w.alpha / a],
    ))
}

pub(super) fn low_shelf(p: &Equalizer, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    finite("gain_db", p.gain_db)?;
    let w = warp(p.frequency_hz, p.q, fs)?;
    let a = 10f64.powf(p.gain_db / 40.0);
    let beta = 2.0 * a.sqrt() * w.alpha;
    Ok(BiquadCoefficients::normalized(
        [
            a * ((a + 1.0) - (a - 1.0) * w.cos + beta),
            2.0 * a * ((a - 1.0) - (a + 1.0) * w.cos),
            a * ((a + 1.0) - (a - 1.0) * w.cos - beta),
        ],
        [
            (a + 1.0) + (a - 1.0) * w.cos + beta,
            -2.0 * ((a - 1.0) + (a + 1.0) * w.cos),
            (a + 1.0) + (a - 1.0) * w.cos - beta,
        ],
    ))
}

pub(super) fn high_shelf(p: &Equalizer, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    finite("gain_db", p.gain_db)?;
    let w = warp(p.frequency_hz, p.q, fs)?;
    let a = 10f64.powf(p.gain_db / 40.0);
    let beta = 2.0 * a.sqrt() * w.alpha;
    Ok(BiquadCoefficients::normalized(
        [
            a * ((a + 1.0) + (a - 1.0) * w.cos + beta),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * w.cos),
            a * ((a + 1.0) + (a - 1.0) * w.cos - beta),
        ],
        [
            (a + 1.0) - (a - 1.0) * w.cos + beta,
            2.0 * ((a - 1.0) - (a + 1.0) * w.cos),
            (a + 1.0) - (a - 1.0) * w.cos - beta,
        ],
    ))
}
