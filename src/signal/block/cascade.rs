use sci_rs::signal::filter::design::Sos;
use sci_rs::signal::filter::sosfilt_dyn;

use crate::signal::biquad::BiquadCoefficients;
use crate::signal::SignalBlock;

/// Runs samples through a channel's biquad stages in series, the way the
/// device applies them: the second stage consumes the output of the first.
pub struct BiquadCascade {
    taps: Vec<Sos<f64>>,
    memory: Vec<Sos<f64>>,
}

impl BiquadCascade {
    pub fn new(stages: &[BiquadCoefficients]) -> Self {
        let taps: Vec<Sos<f64>> = stages.iter().map(BiquadCoefficients::to_sos).collect();
        let mut result = BiquadCascade {
            taps,
            memory: [].to_vec(),
        };
        result.reset();
        result
    }

    /// Number of stages in the cascade.
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }
}

impl SignalBlock<f64> for BiquadCascade {
    fn reset(&mut self) {
        self.memory = self.taps.clone();
    }

    fn process(&mut self, input: &ndarray::Array1<f64>) -> ndarray::Array1<f64> {
        if self.memory.is_empty() {
            return input.clone();
        }
        ndarray::Array1::from_iter(sosfilt_dyn(input, self.memory.as_mut_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{compute_biquad, FilterSpec, SecondOrder};
    use ndarray::Array1;

    fn test_signal() -> Array1<f64> {
        Array1::from_iter((0..256).map(|n| {
            let t = n as f64;
            (0.05 * t).sin() + 0.25 * (0.9 * t).cos() - 0.1
        }))
    }

    #[test]
    fn passthrough_leaves_signal_unchanged() {
        let stages = [BiquadCoefficients::IDENTITY, BiquadCoefficients::IDENTITY];
        let mut cascade = BiquadCascade::new(&stages);
        let input = test_signal();
        let output = cascade.process(&input);
        assert_eq!(output.len(), input.len());
        for (x, y) in input.iter().zip(output.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn stages_apply_in_series() {
        let gain = |k: f64| BiquadCoefficients::new(k, 0.0, 0.0, 0.0, 0.0);
        let mut cascade = BiquadCascade::new(&[gain(2.0), gain(-3.0)]);
        let output = cascade.process(&Array1::from_vec(vec![1.0, 0.5]));
        assert!((output[0] + 6.0).abs() < 1e-12);
        assert!((output[1] + 3.0).abs() < 1e-12);
    }

    #[test]
    fn lowpass_settles_to_dc_input() {
        let lp = compute_biquad(
            &FilterSpec::Lowpass(SecondOrder {
                frequency_hz: 1_000.0,
                q: 0.707,
            }),
            48_000.0,
        )
        .expect("design");
        let mut cascade = BiquadCascade::new(&[lp, BiquadCoefficients::IDENTITY]);
        let output = cascade.process(&Array1::from_elem(2_000, 1.5));
        assert!((output[1_999] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_history() {
        let lp = compute_biquad(
            &FilterSpec::Lowpass(SecondOrder {
                frequency_hz: 1_000.0,
                q: 0.707,
            }),
            48_000.0,
        )
        .expect("design");
        let mut cascade = BiquadCascade::new(&[lp]);
        let impulse = Array1::from_vec(vec![1.0, 0.0, 0.0, 0.0]);
        let first = cascade.process(&impulse);
        cascade.reset();
        let second = cascade.process(&impulse);
        assert_eq!(first, second);
    }
}
