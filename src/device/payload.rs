use crate::channel::{ChannelConfig, ChannelMode, STAGES_PER_CHANNEL};
use crate::signal::BiquadCoefficients;
use crate::units::volts_to_mu;
use serde::Serialize;

/// Settings for a single stage in the form the device stores them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StagePayload {
    Raw(RawRepr),
    Pid(PidRepr),
}

impl StagePayload {
    /// Value of the stage's `typ` selector.
    pub fn typ(&self) -> &'static str {
        match self {
            StagePayload::Raw(_) => "Raw",
            StagePayload::Pid(_) => "Pid",
        }
    }
}

/// `repr/Raw`: coefficients plus offset and output clamp in machine units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRepr {
    pub ba: [f64; 5],
    pub u: i32,
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidGains {
    pub p: i64,
    pub i: i64,
    pub d: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PidIntegratorLimit {
    pub i: [i32; 2],
}

/// `repr/Pid`: scaled gains, setpoint, offset and clamps in machine units.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidRepr {
    pub gain: PidGains,
    pub setpoint: i32,
    pub u: i32,
    pub min: i32,
    pub max: i32,
    pub limit: PidIntegratorLimit,
}

/// Everything written during the reload step of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DevicePayload {
    pub stages: [StagePayload; STAGES_PER_CHANNEL],
}

impl DevicePayload {
    /// Encode a validated configuration. The offset is applied by the first
    /// stage only so that it is not added twice.
    pub fn from_config(config: &ChannelConfig) -> Self {
        let [min, max] = config.output_limits.to_mu();
        let offset = volts_to_mu(config.offset);
        let raw = |coefficients: &BiquadCoefficients, u: i32| {
            StagePayload::Raw(RawRepr {
                ba: coefficients.to_device_ba(),
                u,
                min,
                max,
            })
        };
        let stages = match &config.mode {
            ChannelMode::Raw { stages } => {
                let first = stages.first().copied().unwrap_or_default();
                let second = stages.get(1).copied().unwrap_or_default();
                [raw(&first, offset), raw(&second, 0)]
            }
            ChannelMode::Pid { spec, scaled } => {
                let pid = PidRepr {
                    gain: PidGains {
                        p: scaled.p,
                        i: scaled.i,
                        d: scaled.d,
                    },
                    setpoint: volts_to_mu(spec.setpoint),
                    u: offset,
                    min,
                    max,
                    limit: PidIntegratorLimit {
                        i: spec
                            .integrator_limits
                            .unwrap_or(config.output_limits)
                            .to_mu(),
                    },
                };
                [
                    StagePayload::Pid(pid),
                    raw(&BiquadCoefficients::IDENTITY, 0),
                ]
            }
        };
        Self { stages }
    }
}
