//! The hold -> reload -> run handshake for one channel.
//!
//! Each phase is its own type and only offers the step that may follow it,
//! so a sequence cannot skip ahead to `run` without a written payload or
//! write to a channel that is still processing.
use super::error::ControlError;
use crate::channel::{Channel, ChannelState, StateTransition};
use crate::device::{Device, DeviceError, DevicePayload};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepTiming {
    /// How long each device command may go unacknowledged.
    pub ack_timeout: Duration,
    /// Extra attempts at the idempotent write step after an ack timeout.
    pub write_retries: u32,
}

/// Owns the published state of one channel.
pub struct StateTracker {
    channel: Channel,
    state: watch::Sender<ChannelState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl StateTracker {
    pub fn new(
        channel: Channel,
        state: watch::Sender<ChannelState>,
        transitions: broadcast::Sender<StateTransition>,
    ) -> Self {
        Self {
            channel,
            state,
            transitions,
        }
    }

    pub fn current(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn enter(&self, to: ChannelState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!(channel = %self.channel, %from, state = %to, "channel state");
            // Nobody listening is fine.
            let _ = self.transitions.send(StateTransition {
                channel: self.channel,
                from,
                to,
            });
        }
    }
}

/// What every phase carries along.
pub struct Link<'a, D> {
    device: &'a D,
    channel: Channel,
    timing: StepTiming,
    tracker: &'a StateTracker,
}

impl<'a, D: Device> Link<'a, D> {
    pub fn new(
        device: &'a D,
        channel: Channel,
        timing: StepTiming,
        tracker: &'a StateTracker,
    ) -> Self {
        Self {
            device,
            channel,
            timing,
            tracker,
        }
    }

    /// Begin a sequence. The channel is either running or parked after an
    /// earlier failure; both start with `hold`.
    pub fn begin(self) -> Idle<'a, D> {
        Idle(self)
    }

    async fn acknowledged(
        &self,
        command: impl Future<Output = Result<(), DeviceError>>,
    ) -> Result<(), ControlError> {
        match timeout(self.timing.ack_timeout, command).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ControlError::AckTimeout),
        }
    }

    fn fail(self, error: ControlError) -> Failure<'a, D> {
        warn!(channel = %self.channel, error = %error, "sequence failed, channel held");
        self.tracker.enter(ChannelState::Held);
        Failure {
            held: Held(self),
            error,
        }
    }
}

pub struct Idle<'a, D>(Link<'a, D>);
pub struct Held<'a, D>(Link<'a, D>);
pub struct Reloading<'a, D>(Link<'a, D>);
pub struct Running<'a, D>(Link<'a, D>);

/// A sequence that stopped early. The channel is parked in `Held`.
pub struct Failure<'a, D> {
    pub held: Held<'a, D>,
    pub error: ControlError,
}

impl<'a, D: Device> Idle<'a, D> {
    pub async fn hold(self) -> Result<Held<'a, D>, Failure<'a, D>> {
        let link = self.0;
        let acked = link.acknowledged(link.device.hold(link.channel)).await;
        match acked {
            Ok(()) => {
                link.tracker.enter(ChannelState::Held);
                Ok(Held(link))
            }
            Err(e) => Err(link.fail(e)),
        }
    }
}

impl<'a, D: Device> Held<'a, D> {
    pub async fn reload(self, payload: &DevicePayload) -> Result<Reloading<'a, D>, Failure<'a, D>> {
        let link = self.0;
        link.tracker.enter(ChannelState::Reloading);
        let mut attempt = 0;
        loop {
            let acked = link
                .acknowledged(link.device.write_config(link.channel, payload))
                .await;
            match acked {
                Ok(()) => return Ok(Reloading(link)),
                Err(ControlError::AckTimeout) if attempt < link.timing.write_retries => {
                    attempt += 1;
                    debug!(channel = %link.channel, attempt, "write unacknowledged, retrying");
                }
                Err(e) => return Err(link.fail(e)),
            }
        }
    }
}

impl<'a, D: Device> Reloading<'a, D> {
    /// Release the channel. `commit` runs once the device has acknowledged
    /// and before the channel is reported as running again.
    pub async fn run(self, commit: impl FnOnce()) -> Result<Running<'a, D>, Failure<'a, D>> {
        let link = self.0;
        let acked = link.acknowledged(link.device.run(link.channel)).await;
        match acked {
            Ok(()) => {
                commit();
                link.tracker.enter(ChannelState::Run);
                Ok(Running(link))
            }
            Err(e) => Err(link.fail(e)),
        }
    }
}

impl<D> Running<'_, D> {
    pub fn channel(&self) -> Channel {
        self.0.channel
    }
}
