use super::design::DesignError;
use crate::units::Range;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidTerm {
    Proportional,
    Integral,
    Derivative,
}

impl Display for PidTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PidTerm::Proportional => "proportional",
            PidTerm::Integral => "integral",
            PidTerm::Derivative => "derivative",
        };
        f.write_str(name)
    }
}

/// Requested PID controller settings, in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidSpec {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,

    /// Input level the loop regulates towards, in volts.
    #[serde(default)]
    pub setpoint: f64,

    /// Output clamp, in volts. When absent the channel's current output
    /// limits are kept.
    #[serde(default)]
    pub output_limits: Option<Range>,

    /// Integrator clamp, in volts.
    #[serde(default)]
    pub integrator_limits: Option<Range>,
}

impl PidSpec {
    pub fn gains(&self) -> [(PidTerm, f64); 3] {
        [
            (PidTerm::Proportional, self.kp),
            (PidTerm::Integral, self.ki),
            (PidTerm::Derivative, self.kd),
        ]
    }
}

/// Fixed-point encoding of one gain term: `round(gain * scale)` stored in a
/// signed integer of `bits` bits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TermScaling {
    /// Multiplier applied before rounding.
    /// Default: 65536 (Q16.16)
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Register width, sign bit included.
    /// Default: 32
    #[serde(default = "default_bits")]
    pub bits: u8,
}

impl Default for TermScaling {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            bits: default_bits(),
        }
    }
}

impl TermScaling {
    /// Largest representable magnitude, or `None` when the register width
    /// leaves no room for a signed value (outside 2..=64 bits).
    pub fn limit(&self) -> Option<u64> {
        let magnitude_bits = self.bits.checked_sub(1).filter(|b| (1..64).contains(b))?;
        Some((1u64 << magnitude_bits) - 1)
    }
}

fn default_scale() -> f64 {
    65536.0
}

fn default_bits() -> u8 {
    32
}

/// Per-term scaling of the device's PID registers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PidScaling {
    #[serde(default)]
    pub p: TermScaling,
    #[serde(default)]
    pub i: TermScaling,
    #[serde(default)]
    pub d: TermScaling,
}

impl PidScaling {
    pub fn term(&self, term: PidTerm) -> &TermScaling {
        match term {
            PidTerm::Proportional => &self.p,
            PidTerm::Integral => &self.i,
            PidTerm::Derivative => &self.d,
        }
    }
}

/// PID gains in device register units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaledPidCoefficients {
    pub p: i64,
    pub i: i64,
    pub d: i64,
}

/// Quantize the gains of `spec` into register values.
///
/// Limits are passed through untouched; this only checks that they are
/// well formed. Whether they fit the channel's safety envelope is decided
/// by [`crate::safety::validate`].
pub fn compute_pid(
    spec: &PidSpec,
    scaling: &PidScaling,
) -> Result<ScaledPidCoefficients, DesignError> {
    for (name, limits) in [
        ("output limits", spec.output_limits),
        ("integrator limits", spec.integrator_limits),
    ] {
        if let Some(range) = limits {
            if !range.is_ordered() {
                return Err(DesignError::InvalidParameter(format!(
                    "{name} {range} must be finite with lower <= upper"
                )));
            }
        }
    }
    if !spec.setpoint.is_finite() {
        return Err(DesignError::InvalidParameter(format!(
            "setpoint must be finite, got {}",
            spec.setpoint
        )));
    }

    let mut scaled = [0i64; 3];
    for (slot, (term, gain)) in scaled.iter_mut().zip(spec.gains()) {
        *slot = quantize(term, gain, scaling.term(term))?;
    }
    let [p, i, d] = scaled;
    Ok(ScaledPidCoefficients { p, i, d })
}

fn quantize(term: PidTerm, gain: f64, scaling: &TermScaling) -> Result<i64, DesignError> {
    if !gain.is_finite() {
        return Err(DesignError::InvalidParameter(format!(
            "{term} gain must be finite, got {gain}"
        )));
    }
    let limit = scaling
        .limit()
        .filter(|_| scaling.scale.is_finite() && scaling.scale > 0.0)
        .ok_or_else(|| {
            DesignError::InvalidParameter(format!(
                "{term} scaling {}x in {} bits is not usable",
                scaling.scale, scaling.bits
            ))
        })?;
    let scaled = (gain * scaling.scale).round();
    if scaled.abs() > limit as f64 {
        return Err(DesignError::GainOutOfRange {
            term,
            gain,
            scaled,
            limit,
        });
    }
    Ok(scaled as i64)
}
