use crate::channel::StreamTarget;
use crate::safety::SafetyLimits;
use crate::units::Range;
use serde::Deserialize;

/// Start-up settings for one channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Electrical envelope every request is checked against.
    #[serde(default)]
    pub limits: SafetyLimits,

    /// Output clamp in effect until a request changes it, in volts.
    /// Default: ±2 V
    #[serde(default = "default_output_limits")]
    pub default_output: Range,

    /// Where to point the monitoring stream at start-up.
    #[serde(default)]
    pub stream_target: Option<StreamTarget>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            limits: SafetyLimits::default(),
            default_output: default_output_limits(),
            stream_target: None,
        }
    }
}

fn default_output_limits() -> Range {
    Range::symmetric(2.0)
}
