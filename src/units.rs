//! Voltage ranges and conversion between volts and DAC machine units.
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Largest positive code of the 16-bit DAC.
pub const FULL_SCALE_CODE: i32 = (1 << 15) - 1;

/// Output voltage produced by `FULL_SCALE_CODE`.
pub const FULL_SCALE_VOLTS: f64 = 10.0;

/// Volts represented by one DAC least-significant bit.
pub const VOLTS_PER_LSB: f64 = FULL_SCALE_VOLTS / FULL_SCALE_CODE as f64;

/// Convert volts to the nearest DAC code. Values beyond the representable
/// range saturate; the safety layer rejects those before they get here.
pub fn volts_to_mu(volts: f64) -> i32 {
    (volts / VOLTS_PER_LSB).round() as i32
}

pub fn mu_to_volts(mu: i32) -> f64 {
    mu as f64 * VOLTS_PER_LSB
}

/// A closed interval `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Symmetric interval `[-bound, bound]`.
    pub const fn symmetric(bound: f64) -> Self {
        Self {
            min: -bound,
            max: bound,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// True when both ends are finite and `min <= max`.
    pub fn is_ordered(&self) -> bool {
        self.is_finite() && self.min <= self.max
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// True when `other` is well formed and lies entirely inside `self`.
    pub fn encloses(&self, other: &Range) -> bool {
        other.is_ordered() && self.contains(other.min) && self.contains(other.max)
    }

    /// Both ends in machine units.
    pub fn to_mu(&self) -> [i32; 2] {
        [volts_to_mu(self.min), volts_to_mu(self.max)]
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}
