//! Outbound device surface: the four commands a channel controller issues,
//! and the transports that carry them.
mod memory;
mod miniconf;
mod payload;

pub use memory::{Command, Fault, MemoryDevice, Step};
pub use miniconf::{DeviceStatus, MiniconfDevice, MiniconfInbox, Telemetry};
pub use payload::{DevicePayload, PidRepr, RawRepr, StagePayload};

use crate::channel::{Channel, StreamTarget};
use std::future::Future;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unresponsive: {0}")]
    Unresponsive(String),
    #[error("timed out waiting for acknowledgment")]
    AckTimeout,
    #[error("device refused {path}: {message}")]
    Rejected { path: String, message: String },
    #[error("MQTT client error")]
    Transport(#[from] rumqttc::v5::ClientError),
    #[error("unable to encode setting")]
    Encode(#[from] serde_json::Error),
}

/// A board that accepts channel commands and acknowledges each one.
///
/// Every future resolves once the device has acknowledged the command or
/// explicitly refused it. Callers bound the wait with their own timeout.
pub trait Device: Send + Sync + 'static {
    /// Stop processing on `channel` and park its output.
    fn hold(&self, channel: Channel) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Write a full set of stage settings. Must be idempotent.
    fn write_config(
        &self,
        channel: Channel,
        payload: &DevicePayload,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Resume processing on `channel` with whatever settings were written.
    fn run(&self, channel: Channel) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Point the monitoring stream somewhere else.
    fn set_stream_target(
        &self,
        channel: Channel,
        target: &StreamTarget,
    ) -> impl Future<Output = Result<(), DeviceError>> + Send;
}
