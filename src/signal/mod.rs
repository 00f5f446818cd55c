//! Coefficient engine: stateless filter design, PID gain scaling and an
//! offline model of the device's biquad cascade.
mod biquad;
mod block;
mod design;
mod pid;

pub use biquad::{BiquadCoefficients, POLE_TOLERANCE};
pub use block::cascade::BiquadCascade;
pub use design::{
    compute_biquad, ensure_stable, Butterworth, ButterworthBand, DesignError, Equalizer,
    FilterSpec, FirstOrder, GainLimited, SecondOrder,
};
pub use pid::{compute_pid, PidScaling, PidSpec, PidTerm, ScaledPidCoefficients, TermScaling};

/// A block of signal processing that consumes a frame of samples and
/// produces a frame of the same length.
pub trait SignalBlock<T> {
    fn reset(&mut self);
    fn process(&mut self, input: &ndarray::Array1<T>) -> ndarray::Array1<T>;
}
