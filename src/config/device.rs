use serde::Deserialize;

/// The board being controlled and how patient to be with it.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Miniconf topic prefix, e.g. `dt/sinara/dual-iir/44-b7-d0-cc-65-c0`.
    pub prefix: String,

    /// Rate at which the board's biquads run, in Hz.
    /// Default: 781250 (100 MHz / 128)
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: f64,

    /// Time allowed for each command to be acknowledged, in milliseconds.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Extra attempts at writing settings when an acknowledgment is late.
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Write each channel's start-up settings to the board before taking
    /// requests.
    #[serde(default)]
    pub reapply_on_start: bool,

    /// Requests that may wait behind the one in progress, per channel.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_sample_rate_hz() -> f64 {
    781_250.0
}

fn default_ack_timeout_ms() -> u64 {
    1000
}

fn default_write_retries() -> u32 {
    1
}

fn default_queue_depth() -> usize {
    16
}
