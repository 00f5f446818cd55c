use serde::{Deserialize, Serialize};

pub use sci_rs::signal::filter::design::Sos;

/// Poles closer than this to the unit circle count as unstable.
pub const POLE_TOLERANCE: f64 = 1e-12;

/// A normalized (a0 = 1) second-order section.
///
/// The difference equation is
///
/// ```text
/// y[n] = b0 x[n] + b1 x[n-1] + b2 x[n-2] - a1 y[n-1] - a2 y[n-2]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BiquadCoefficients {
    /// Passes every sample through untouched.
    pub const IDENTITY: BiquadCoefficients = BiquadCoefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    pub const fn new(b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) -> Self {
        Self { b0, b1, b2, a1, a2 }
    }

    /// Build from un-normalized coefficients by dividing through by `a0`.
    pub fn normalized(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b0: b[0] / a0,
            b1: b[1] / a0,
            b2: b[2] / a0,
            a1: a[1] / a0,
            a2: a[2] / a0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }

    /// Magnitudes of the two roots of `z^2 + a1 z + a2`.
    pub fn pole_magnitudes(&self) -> [f64; 2] {
        let disc = self.a1 * self.a1 - 4.0 * self.a2;
        if disc < 0.0 {
            // Complex conjugate pair, |p|^2 = a2.
            let m = self.a2.sqrt();
            return [m, m];
        }
        // Real roots; pick the larger one first to avoid cancellation.
        let sq = disc.sqrt();
        let r1 = -0.5 * (self.a1 + self.a1.signum() * sq);
        let r2 = if r1 == 0.0 { 0.0 } else { self.a2 / r1 };
        [r1.abs(), r2.abs()]
    }

    /// Largest pole magnitude, or NaN for non-finite coefficients.
    pub fn max_pole_magnitude(&self) -> f64 {
        if !self.is_finite() {
            return f64::NAN;
        }
        let [p1, p2] = self.pole_magnitudes();
        p1.max(p2)
    }

    /// Finite and with every pole strictly inside the unit circle.
    pub fn is_stable(&self) -> bool {
        let m = self.max_pole_magnitude();
        m.is_finite() && m < 1.0 - POLE_TOLERANCE
    }

    /// Gain at DC, `H(z = 1)`.
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Coefficients in the device's `ba` order. The device accumulates
    /// feedback terms with a positive sign, so a1 and a2 are negated.
    pub fn to_device_ba(&self) -> [f64; 5] {
        [self.b0, self.b1, self.b2, -self.a1, -self.a2]
    }

    pub fn to_sos(&self) -> Sos<f64> {
        Sos::new([self.b0, self.b1, self.b2], [1.0, self.a1, self.a2])
    }
}

impl From<&Sos<f64>> for BiquadCoefficients {
    fn from(sos: &Sos<f64>) -> Self {
        BiquadCoefficients::normalized(sos.b, sos.a)
    }
}
