use serde::{Deserialize, Serialize};
use std::fmt::Display;
use thiserror::Error;
use variant_count::VariantCount;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChannelError {
    #[error("no such channel")]
    NoSuchChannel,
}

/// One of the board's independent IIR/PID channels.
#[derive(Debug, PartialEq, Eq, Hash, Copy, Clone, VariantCount, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum Channel {
    Ch0,
    Ch1,
}

impl Channel {
    pub const fn max() -> usize {
        Channel::VARIANT_COUNT
    }

    /// All channels in index order.
    pub fn all() -> impl Iterator<Item = Channel> {
        (0..Channel::max()).filter_map(|i| Channel::try_from(i).ok())
    }

    pub fn index(self) -> usize {
        self.into()
    }
}

impl From<Channel> for usize {
    fn from(value: Channel) -> Self {
        match value {
            Channel::Ch0 => 0,
            Channel::Ch1 => 1,
        }
    }
}

impl TryFrom<usize> for Channel {
    type Error = ChannelError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        let res = match value {
            0 => Channel::Ch0,
            1 => Channel::Ch1,
            _ => return Err(ChannelError::NoSuchChannel),
        };
        Ok(res)
    }
}

impl TryFrom<&str> for Channel {
    type Error = ChannelError;

    /// Accepts the bare index ("0") or the "ch0" spelling.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let digits = value.strip_prefix("ch").unwrap_or(value);
        digits
            .parse::<usize>()
            .map_err(|_| ChannelError::NoSuchChannel)
            .and_then(Channel::try_from)
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.index())
    }
}
