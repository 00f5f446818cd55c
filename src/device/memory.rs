use super::{Device, DeviceError, DevicePayload};
use crate::channel::{Channel, StreamTarget};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

/// A command as the device received it.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Hold(Channel),
    WriteConfig(Channel, DevicePayload),
    Run(Channel),
    SetStreamTarget(Channel, StreamTarget),
}

impl Command {
    pub fn channel(&self) -> Channel {
        match self {
            Command::Hold(channel)
            | Command::WriteConfig(channel, _)
            | Command::Run(channel)
            | Command::SetStreamTarget(channel, _) => *channel,
        }
    }

    pub fn step(&self) -> Step {
        match self {
            Command::Hold(_) => Step::Hold,
            Command::WriteConfig(..) => Step::WriteConfig,
            Command::Run(_) => Step::Run,
            Command::SetStreamTarget(..) => Step::SetStreamTarget,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Hold,
    WriteConfig,
    Run,
    SetStreamTarget,
}

/// How a scripted command misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The command is received but never acknowledged.
    Silent,
    /// The command fails immediately as if the board were gone.
    Unresponsive,
    /// The board refuses the command.
    Reject,
}

#[derive(Default)]
struct Board {
    received: Vec<Command>,
    once: HashMap<(Channel, Step), VecDeque<Fault>>,
    always: HashMap<(Channel, Step), Fault>,
    written: HashMap<Channel, DevicePayload>,
    held: HashMap<Channel, bool>,
    stream: Option<StreamTarget>,
}

impl Board {
    fn next_fault(&mut self, channel: Channel, step: Step) -> Option<Fault> {
        self.once
            .get_mut(&(channel, step))
            .and_then(VecDeque::pop_front)
            .or_else(|| self.always.get(&(channel, step)).copied())
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Hold(channel) => {
                self.held.insert(channel, true);
            }
            Command::WriteConfig(channel, payload) => {
                self.written.insert(channel, payload);
            }
            Command::Run(channel) => {
                self.held.insert(channel, false);
            }
            Command::SetStreamTarget(_, target) => self.stream = Some(target),
        }
    }
}

/// An in-process board that acknowledges everything unless told otherwise.
///
/// Keeps a log of every command received and the settings it would be
/// running with, and can be scripted to stall or refuse particular steps.
#[derive(Default)]
pub struct MemoryDevice {
    board: Mutex<Board>,
    latency: Option<Duration>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every acknowledgment by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Misbehave on the next `step` for `channel` only.
    pub fn fail_next(&self, channel: Channel, step: Step, fault: Fault) {
        self.board()
            .once
            .entry((channel, step))
            .or_default()
            .push_back(fault);
    }

    /// Misbehave on every `step` for `channel` until healed.
    pub fn fail_always(&self, channel: Channel, step: Step, fault: Fault) {
        self.board().always.insert((channel, step), fault);
    }

    pub fn heal(&self) {
        let mut board = self.board();
        board.once.clear();
        board.always.clear();
    }

    pub fn received(&self) -> Vec<Command> {
        self.board().received.clone()
    }

    pub fn received_for(&self, channel: Channel) -> Vec<Command> {
        self.board()
            .received
            .iter()
            .filter(|command| command.channel() == channel)
            .cloned()
            .collect()
    }

    /// Last payload acknowledged for `channel`.
    pub fn written(&self, channel: Channel) -> Option<DevicePayload> {
        self.board().written.get(&channel).cloned()
    }

    pub fn is_held(&self, channel: Channel) -> bool {
        self.board().held.get(&channel).copied().unwrap_or(false)
    }

    pub fn stream_target(&self) -> Option<StreamTarget> {
        self.board().stream
    }

    fn board(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(&self, command: Command) -> Result<(), DeviceError> {
        let channel = command.channel();
        let step = command.step();
        info!(%channel, ?step, "device command");
        let fault = {
            let mut board = self.board();
            board.received.push(command.clone());
            board.next_fault(channel, step)
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match fault {
            None => {
                self.board().apply(command);
                Ok(())
            }
            Some(Fault::Silent) => std::future::pending().await,
            Some(Fault::Unresponsive) => Err(DeviceError::Unresponsive(format!(
                "channel {channel} did not answer"
            ))),
            Some(Fault::Reject) => Err(DeviceError::Rejected {
                path: format!("/ch/{}", channel.index()),
                message: format!("{step:?} refused"),
            }),
        }
    }
}

impl Device for MemoryDevice {
    async fn hold(&self, channel: Channel) -> Result<(), DeviceError> {
        self.execute(Command::Hold(channel)).await
    }

    async fn write_config(
        &self,
        channel: Channel,
        payload: &DevicePayload,
    ) -> Result<(), DeviceError> {
        self.execute(Command::WriteConfig(channel, payload.clone()))
            .await
    }

    async fn run(&self, channel: Channel) -> Result<(), DeviceError> {
        self.execute(Command::Run(channel)).await
    }

    async fn set_stream_target(
        &self,
        channel: Channel,
        target: &StreamTarget,
    ) -> Result<(), DeviceError> {
        self.execute(Command::SetStreamTarget(channel, *target))
            .await
    }
}
