use super::{below_nyquist, DesignError};
use crate::signal::biquad::BiquadCoefficients;
use serde::{Deserialize, Serialize};

use sci_rs::signal::filter::design::butter_dyn;
use sci_rs::signal::filter::design::DigitalFilter;
use sci_rs::signal::filter::design::FilterBandType;
use sci_rs::signal::filter::design::FilterOutputType;
use sci_rs::signal::filter::design::SosFormatFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButterworthBand {
    #[default]
    Lowpass,
    Highpass,
}

/// Maximally flat second-order section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Butterworth {
    /// -3 dB point of the filter.
    pub cutoff_hz: f64,

    /// Low-pass or high-pass.
    /// Default: lowpass
    #[serde(default)]
    pub band: ButterworthBand,
}

pub(super) fn design(p: &Butterworth, fs: f64) -> Result<BiquadCoefficients, DesignError> {
    below_nyquist("cutoff", p.cutoff_hz, fs)?;
    let band = match p.band {
        ButterworthBand::Lowpass => FilterBandType::Lowpass,
        ButterworthBand::Highpass => FilterBandType::Highpass,
    };
    let filter = butter_dyn(
        2,
        [p.cutoff_hz].to_vec(),
        Some(band),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(SosFormatFilter { sos }) = filter else {
        return Err(DesignError::InvalidParameter(
            "butterworth design did not produce second-order sections".to_owned(),
        ));
    };
    match sos.as_slice() {
        [section] => Ok(BiquadCoefficients::from(section)),
        sections => Err(DesignError::InvalidParameter(format!(
            "butterworth design produced {} sections, expected 1",
            sections.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_matches_closed_form() {
        // Bilinear Butterworth: f = tan(pi fc / fs).
        let fs = 48_000.0;
        let fc = 1_000.0;
        let c = design(
            &Butterworth {
                cutoff_hz: fc,
                band: ButterworthBand::Lowpass,
            },
            fs,
        )
        .expect("design");
        let f = (std::f64::consts::PI * fc / fs).tan();
        let a0r = 1.0 / (1.0 + std::f64::consts::SQRT_2 * f + f * f);
        assert!((c.b0 - f * f * a0r).abs() < 1e-9);
        assert!((c.a1 - (2.0 * f * f - 2.0) * a0r).abs() < 1e-9);
        assert!((c.dc_gain() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn highpass_blocks_dc() {
        let c = design(
            &Butterworth {
                cutoff_hz: 200.0,
                band: ButterworthBand::Highpass,
            },
            48_000.0,
        )
        .expect("design");
        assert!(c.dc_gain().abs() < 1e-9);
    }
}
