use super::stream::StreamTarget;
use crate::signal::{BiquadCoefficients, PidSpec, ScaledPidCoefficients};
use crate::units::Range;
use serde::Serialize;

/// Number of biquad stages each channel runs in series.
pub const STAGES_PER_CHANNEL: usize = 2;

/// What the channel's processing chain does.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ChannelMode {
    /// Cascade of biquads, first stage first.
    Raw { stages: Vec<BiquadCoefficients> },
    /// PID controller in place of the first stage.
    Pid {
        spec: PidSpec,
        scaled: ScaledPidCoefficients,
    },
}

/// The complete, applied configuration of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelConfig {
    pub mode: ChannelMode,

    /// Constant added to the output, in volts.
    pub offset: f64,

    /// Output clamp, in volts.
    pub output_limits: Range,

    /// Where monitoring data is streamed, if anywhere.
    pub stream_target: Option<StreamTarget>,
}

impl ChannelConfig {
    /// Start-up state: both stages pass the input through.
    pub fn passthrough(output_limits: Range) -> Self {
        Self {
            mode: ChannelMode::Raw {
                stages: vec![BiquadCoefficients::IDENTITY; STAGES_PER_CHANNEL],
            },
            offset: 0.0,
            output_limits,
            stream_target: None,
        }
    }

    pub fn with_stream_target(mut self, target: Option<StreamTarget>) -> Self {
        self.stream_target = target;
        self
    }

    pub fn is_pid(&self) -> bool {
        matches!(self.mode, ChannelMode::Pid { .. })
    }
}

/// Extend `stages` with pass-through sections up to the per-channel count.
/// Longer lists are left alone for the safety layer to refuse.
pub fn pad_stages(mut stages: Vec<BiquadCoefficients>) -> Vec<BiquadCoefficients> {
    while stages.len() < STAGES_PER_CHANNEL {
        stages.push(BiquadCoefficients::IDENTITY);
    }
    stages
}
