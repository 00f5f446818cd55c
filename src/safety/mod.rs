//! Safety gate between proposed channel settings and the hardware.
//!
//! Every payload is checked here before the first device command of a
//! reload is issued. Violations are reported, never clamped.
use crate::channel::{ChannelConfig, ChannelMode, STAGES_PER_CHANNEL};
use crate::signal::{BiquadCoefficients, PidTerm};
use crate::units::Range;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    #[error("{what} {requested} V is outside the permitted {permitted} V")]
    VoltageOutOfRange {
        what: &'static str,
        requested: Range,
        permitted: Range,
    },
    #[error("offset {offset} V is outside the permitted {permitted} V")]
    OffsetOutOfRange { offset: f64, permitted: Range },
    #[error("{term} gain {gain} is outside the permitted magnitude {permitted}")]
    GainOutOfRange {
        term: PidTerm,
        gain: f64,
        permitted: Range,
    },
    #[error("stage {stage} is unstable (largest pole magnitude {pole_magnitude})")]
    UnstableFilter { stage: usize, pole_magnitude: f64 },
    #[error("{stages} stages requested, the channel has {}", STAGES_PER_CHANNEL)]
    TooManyStages { stages: usize },
}

/// Electrical envelope of one channel. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SafetyLimits {
    /// Range any output or integrator clamp must stay within, in volts.
    /// Default: ±10 V
    #[serde(default = "default_voltage")]
    pub voltage: Range,

    /// Range of the output offset, in volts.
    /// Default: ±10 V
    #[serde(default = "default_offset")]
    pub offset: Range,

    /// Range of PID gain magnitudes. Zero gains are always allowed.
    /// Default: 0 ..= 10000
    #[serde(default = "default_gain")]
    pub gain: Range,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            voltage: default_voltage(),
            offset: default_offset(),
            gain: default_gain(),
        }
    }
}

fn default_voltage() -> Range {
    Range::symmetric(10.0)
}

fn default_offset() -> Range {
    Range::symmetric(10.0)
}

fn default_gain() -> Range {
    Range::new(0.0, 1e4)
}

/// Check a proposed configuration against a channel's limits.
///
/// Checks run in a fixed order (stage count, stability, gains, voltages,
/// offset) and the first violation is returned.
pub fn validate(config: &ChannelConfig, limits: &SafetyLimits) -> Result<(), Rejection> {
    match &config.mode {
        ChannelMode::Raw { stages } => validate_stages(stages)?,
        ChannelMode::Pid { spec, .. } => {
            for (term, gain) in spec.gains() {
                validate_gain(term, gain, &limits.gain)?;
            }
            if let Some(integrator) = spec.integrator_limits {
                validate_voltage("integrator limits", &integrator, &limits.voltage)?;
            }
        }
    }
    validate_voltage("output limits", &config.output_limits, &limits.voltage)?;
    if !(config.offset.is_finite() && limits.offset.contains(config.offset)) {
        return Err(Rejection::OffsetOutOfRange {
            offset: config.offset,
            permitted: limits.offset,
        });
    }
    Ok(())
}

fn validate_stages(stages: &[BiquadCoefficients]) -> Result<(), Rejection> {
    if stages.len() > STAGES_PER_CHANNEL {
        return Err(Rejection::TooManyStages {
            stages: stages.len(),
        });
    }
    for (stage, coefficients) in stages.iter().enumerate() {
        if !coefficients.is_stable() {
            return Err(Rejection::UnstableFilter {
                stage,
                pole_magnitude: coefficients.max_pole_magnitude(),
            });
        }
    }
    Ok(())
}

fn validate_gain(term: PidTerm, gain: f64, permitted: &Range) -> Result<(), Rejection> {
    let magnitude = gain.abs();
    let ok = gain.is_finite()
        && magnitude <= permitted.max
        && (magnitude == 0.0 || magnitude >= permitted.min);
    if ok {
        Ok(())
    } else {
        Err(Rejection::GainOutOfRange {
            term,
            gain,
            permitted: *permitted,
        })
    }
}

fn validate_voltage(
    what: &'static str,
    requested: &Range,
    permitted: &Range,
) -> Result<(), Rejection> {
    if permitted.encloses(requested) {
        Ok(())
    } else {
        Err(Rejection::VoltageOutOfRange {
            what,
            requested: *requested,
            permitted: *permitted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{PidSpec, ScaledPidCoefficients};

    fn raw(stages: Vec<BiquadCoefficients>) -> ChannelConfig {
        ChannelConfig {
            mode: ChannelMode::Raw { stages },
            offset: 0.0,
            output_limits: Range::symmetric(5.0),
            stream_target: None,
        }
    }

    fn pid(kp: f64, ki: f64, kd: f64, output_limits: Range) -> ChannelConfig {
        ChannelConfig {
            mode: ChannelMode::Pid {
                spec: PidSpec {
                    kp,
                    ki,
                    kd,
                    setpoint: 0.0,
                    output_limits: Some(output_limits),
                    integrator_limits: None,
                },
                scaled: ScaledPidCoefficients::default(),
            },
            offset: 0.0,
            output_limits,
            stream_target: None,
        }
    }

    #[test]
    fn defaults_accept_passthrough() {
        let config = ChannelConfig::passthrough(Range::symmetric(2.0));
        assert_eq!(validate(&config, &SafetyLimits::default()), Ok(()));
    }

    #[test]
    fn output_limits_beyond_envelope() {
        let config = pid(1.0, 500.0, 0.0, Range::new(-20.0, 5.0));
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::VoltageOutOfRange {
                what: "output limits",
                ..
            })
        ));
    }

    #[test]
    fn inverted_output_limits() {
        let mut config = raw(vec![BiquadCoefficients::IDENTITY]);
        config.output_limits = Range::new(1.0, -1.0);
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::VoltageOutOfRange { .. })
        ));
    }

    #[test]
    fn integrator_limits_beyond_envelope() {
        let mut config = pid(1.0, 0.0, 0.0, Range::symmetric(1.0));
        if let ChannelMode::Pid { spec, .. } = &mut config.mode {
            spec.integrator_limits = Some(Range::new(-1.0, 11.0));
        }
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::VoltageOutOfRange {
                what: "integrator limits",
                ..
            })
        ));
    }

    #[test]
    fn offset_beyond_envelope() {
        let mut config = raw(vec![BiquadCoefficients::IDENTITY]);
        config.offset = 10.5;
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::OffsetOutOfRange { .. })
        ));
        config.offset = f64::NAN;
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn gain_magnitude_bounds() {
        let limits = SafetyLimits {
            gain: Range::new(1e-3, 100.0),
            ..SafetyLimits::default()
        };
        let too_big = pid(0.0, -250.0, 0.0, Range::symmetric(1.0));
        assert!(matches!(
            validate(&too_big, &limits),
            Err(Rejection::GainOutOfRange {
                term: PidTerm::Integral,
                ..
            })
        ));
        let too_small = pid(0.0, 0.0, 1e-6, Range::symmetric(1.0));
        assert!(matches!(
            validate(&too_small, &limits),
            Err(Rejection::GainOutOfRange {
                term: PidTerm::Derivative,
                ..
            })
        ));
        let zeros_allowed = pid(1.0, 0.0, 0.0, Range::symmetric(1.0));
        assert_eq!(validate(&zeros_allowed, &limits), Ok(()));
    }

    #[test]
    fn unstable_stage_reported_by_index() {
        let bad = BiquadCoefficients::new(1.0, 0.0, 0.0, 0.0, 1.5);
        let config = raw(vec![BiquadCoefficients::IDENTITY, bad]);
        assert!(matches!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::UnstableFilter { stage: 1, .. })
        ));
    }

    #[test]
    fn three_stages_rejected() {
        let config = raw(vec![BiquadCoefficients::IDENTITY; 3]);
        assert_eq!(
            validate(&config, &SafetyLimits::default()),
            Err(Rejection::TooManyStages { stages: 3 })
        );
    }

    #[test]
    fn limits_deserialize_with_defaults() {
        let limits: SafetyLimits =
            serde_json::from_str(r#"{"voltage": {"min": -5.0, "max": 5.0}}"#).expect("parse");
        assert_eq!(limits.voltage, Range::symmetric(5.0));
        assert_eq!(limits.offset, Range::symmetric(10.0));
    }
}
