//! Filter design: turns a [`FilterSpec`] into one normalized biquad section
//! at the device sample rate.
mod butterworth;
mod cookbook;
mod prototype;

pub use butterworth::{Butterworth, ButterworthBand};
pub use cookbook::{Equalizer, SecondOrder};
pub use prototype::{FirstOrder, GainLimited};

use super::biquad::BiquadCoefficients;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DesignError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("filter is unstable (largest pole magnitude {0})")]
    UnstableFilter(f64),
    #[error("{term} gain {gain} scales to {scaled}, beyond the device limit of ±{limit}")]
    GainOutOfRange {
        term: super::pid::PidTerm,
        gain: f64,
        scaled: f64,
        limit: u64,
    },
}

/// Every filter kind the engine can place into one biquad stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    Lowpass(SecondOrder),
    Highpass(SecondOrder),
    Bandpass(SecondOrder),
    Notch(SecondOrder),
    Allpass(SecondOrder),
    Peak(Equalizer),
    LowShelf(Equalizer),
    HighShelf(Equalizer),
    Butterworth(Butterworth),
    FirstOrderLowpass(FirstOrder),
    FirstOrderHighpass(FirstOrder),
    FirstOrderAllpass(FirstOrder),
    ProportionalIntegral(GainLimited),
    ProportionalDerivative(GainLimited),
    Proportional { gain: f64 },
    Passthrough,
    /// Caller-supplied coefficients, uploaded without any design step.
    Coefficients(BiquadCoefficients),
}

/// Design one biquad stage for `spec` at `sample_rate_hz`.
///
/// The result is always finite and stable; anything else is reported as
/// [`DesignError::UnstableFilter`].
pub fn compute_biquad(
    spec: &FilterSpec,
    sample_rate_hz: f64,
) -> Result<BiquadCoefficients, DesignError> {
    if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
        return Err(DesignError::InvalidParameter(format!(
            "sample rate {sample_rate_hz} Hz must be positive"
        )));
    }
    let fs = sample_rate_hz;
    let coefficients = match spec {
        FilterSpec::Lowpass(p) => cookbook::lowpass(p, fs)?,
        FilterSpec::Highpass(p) => cookbook::highpass(p, fs)?,
        FilterSpec::Bandpass(p) => cookbook::bandpass(p, fs)?,
        FilterSpec::Notch(p) => cookbook::notch(p, fs)?,
        FilterSpec::Allpass(p) => cookbook::allpass(p, fs)?,
        FilterSpec::Peak(p) => cookbook::peak(p, fs)?,
        FilterSpec::LowShelf(p) => cookbook::low_shelf(p, fs)?,
        FilterSpec::HighShelf(p) => cookbook::high_shelf(p, fs)?,
        FilterSpec::Butterworth(p) => butterworth::design(p, fs)?,
        FilterSpec::FirstOrderLowpass(p) => prototype::lowpass(p, fs)?,
        FilterSpec::FirstOrderHighpass(p) => prototype::highpass(p, fs)?,
        FilterSpec::FirstOrderAllpass(p) => prototype::allpass(p, fs)?,
        FilterSpec::ProportionalIntegral(p) => prototype::proportional_integral(p, fs)?,
        FilterSpec::ProportionalDerivative(p) => prototype::proportional_derivative(p, fs)?,
        FilterSpec::Proportional { gain } => {
            finite("gain", *gain)?;
            BiquadCoefficients::new(*gain, 0.0, 0.0, 0.0, 0.0)
        }
        FilterSpec::Passthrough => BiquadCoefficients::IDENTITY,
        FilterSpec::Coefficients(c) => *c,
    };
    ensure_stable(coefficients)
}

/// Reject coefficient sets that are non-finite or have a pole on or outside
/// the unit circle.
pub fn ensure_stable(c: BiquadCoefficients) -> Result<BiquadCoefficients, DesignError> {
    if c.is_stable() {
        Ok(c)
    } else {
        Err(DesignError::UnstableFilter(c.max_pole_magnitude()))
    }
}

fn finite(name: &str, value: f64) -> Result<(), DesignError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DesignError::InvalidParameter(format!(
            "{name} must be finite, got {value}"
        )))
    }
}

fn positive(name: &str, value: f64) -> Result<(), DesignError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DesignError::InvalidParameter(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

/// The design frequency must lie strictly between DC and Nyquist.
fn below_nyquist(name: &str, hz: f64, sample_rate_hz: f64) -> Result<(), DesignError> {
    let nyquist = sample_rate_hz / 2.0;
    if hz.is_finite() && hz > 0.0 && hz < nyquist {
        Ok(())
    } else {
        Err(DesignError::InvalidParameter(format!(
            "{name} {hz} Hz is outside (0, {nyquist}) Hz"
        )))
    }
}
