use super::controller::{ChannelHandle, FilterSelection, Proposal, RawSelection};
use super::error::ControlError;
use crate::channel::{ChannelConfig, ChannelState, StateTransition, StreamTarget};
use crate::signal::{FilterSpec, PidSpec};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Front door for channel requests. Cheap to clone; every clone routes to
/// the same controllers.
///
/// Requests for one channel are queued and applied in arrival order, while
/// different channels proceed independently.
#[derive(Clone)]
pub struct CommandDispatcher {
    channels: Arc<[ChannelHandle]>,
}

impl CommandDispatcher {
    pub fn new(mut handles: Vec<ChannelHandle>) -> Self {
        handles.sort_by_key(|handle| handle.channel().index());
        Self {
            channels: handles.into(),
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn handle(&self, channel: usize) -> Result<&ChannelHandle, ControlError> {
        self.channels
            .iter()
            .find(|handle| handle.channel().index() == channel)
            .ok_or_else(|| {
                ControlError::InvalidParameter(format!(
                    "channel {channel} does not exist, valid channels are 0..{}",
                    self.channels.len()
                ))
            })
    }

    /// Run one designed stage, with the second stage passing through.
    pub async fn select_filter(
        &self,
        channel: usize,
        spec: FilterSpec,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.select_filters(
            channel,
            FilterSelection {
                stages: vec![spec],
                offset: None,
                output_limits: None,
            },
        )
        .await
    }

    pub async fn select_filters(
        &self,
        channel: usize,
        selection: FilterSelection,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.handle(channel)?
            .reload(Proposal::Filters(selection))
            .await
    }

    pub async fn apply_raw(
        &self,
        channel: usize,
        selection: RawSelection,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.handle(channel)?.reload(Proposal::Raw(selection)).await
    }

    pub async fn set_pid(
        &self,
        channel: usize,
        spec: PidSpec,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.handle(channel)?.reload(Proposal::Pid(spec)).await
    }

    pub async fn set_stream_target(
        &self,
        channel: usize,
        target: StreamTarget,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.handle(channel)?.retarget(target).await
    }

    pub fn config(&self, channel: usize) -> Result<Arc<ChannelConfig>, ControlError> {
        Ok(self.handle(channel)?.config())
    }

    pub fn state(&self, channel: usize) -> Result<ChannelState, ControlError> {
        Ok(self.handle(channel)?.state())
    }

    pub fn subscribe_transitions(
        &self,
        channel: usize,
    ) -> Result<broadcast::Receiver<StateTransition>, ControlError> {
        Ok(self.handle(channel)?.subscribe())
    }
}
