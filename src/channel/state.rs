use super::index::Channel;
use serde::Serialize;
use std::fmt::Display;

/// Where a channel is in its hold -> reload -> run cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Output parked at a quiescent value, processing stopped.
    Held,
    /// New settings are being written and are not active yet.
    Reloading,
    /// Output driven by the applied configuration.
    #[default]
    Run,
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChannelState::Held => "held",
            ChannelState::Reloading => "reloading",
            ChannelState::Run => "run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub channel: Channel,
    pub from: ChannelState,
    pub to: ChannelState,
}
