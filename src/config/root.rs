use super::channel::ChannelSettings;
use super::device::DeviceConfig;
use super::mqtt::MQTTConfig;
use super::rpc::RpcConfig;
use crate::channel::Channel;
use crate::signal::PidScaling;

use config::{ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("configuration error")]
    ParseError(#[from] ConfigError),
    #[error("configuration path {0:?} is not valid UTF-8")]
    PathEncoding(std::path::PathBuf),
    #[error("{0} channels configured, the board has {max}", max = Channel::max())]
    TooManyChannels(usize),
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Broker carrying both device traffic and control requests.
    pub mqtt: MQTTConfig,

    /// The board being controlled.
    pub device: DeviceConfig,

    /// Control request topics.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Fixed-point encoding of PID gains on the board.
    #[serde(default)]
    pub pid_scaling: PidScaling,

    /// Per-channel settings, by channel index. Missing entries take the
    /// defaults.
    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
}

impl Config {
    pub fn new(
        path: &Path,
        env_prefix: &str,
        env_separator: &str,
    ) -> Result<Self, ConfigurationError> {
        let name = path
            .to_str()
            .ok_or_else(|| ConfigurationError::PathEncoding(path.to_path_buf()))?;
        let config: Self = config::Config::builder()
            .add_source(File::with_name(name).format(FileFormat::Json))
            .add_source(Environment::with_prefix(env_prefix).separator(env_separator))
            .build()
            .and_then(|config| config.try_deserialize())?;
        config.checked()
    }

    fn checked(self) -> Result<Self, ConfigurationError> {
        if self.channels.len() > Channel::max() {
            return Err(ConfigurationError::TooManyChannels(self.channels.len()));
        }
        Ok(self)
    }

    /// Settings for `channel`, falling back to the defaults.
    pub fn channel(&self, channel: Channel) -> ChannelSettings {
        self.channels
            .get(channel.index())
            .cloned()
            .unwrap_or_default()
    }
}
