use crate::channel::{Channel, ChannelError, StreamTarget, StreamTargetError};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamOverrideError {
    #[error("stream override missing channel=target separator")]
    MissingTargetSeparator,
    #[error("unknown channel")]
    UnknownChannel(#[from] ChannelError),
    #[error("bad stream target")]
    BadTarget(#[from] StreamTargetError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// A specification that points a channel's monitoring stream somewhere at
/// start-up, replacing whatever the configuration file says.
pub struct ChannelTiedTarget {
    pub channel: Channel,
    pub target: StreamTarget,
}

impl FromStr for ChannelTiedTarget {
    type Err = StreamOverrideError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (channel, target) = s
            .split_once('=')
            .ok_or(StreamOverrideError::MissingTargetSeparator)?;
        Ok(Self {
            channel: channel.trim().try_into()?,
            target: target.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_one() {
        let tied = ChannelTiedTarget::from_str("ch1=192.168.1.10").expect("works");
        assert_eq!(tied.channel, Channel::Ch1);
        assert_eq!(tied.target.to_string(), "192.168.1.10:9293");
    }

    #[test]
    fn rejects_malformed() {
        assert!(matches!(
            ChannelTiedTarget::from_str("0"),
            Err(StreamOverrideError::MissingTargetSeparator)
        ));
        assert!(matches!(
            ChannelTiedTarget::from_str("4=10.0.0.1"),
            Err(StreamOverrideError::UnknownChannel(_))
        ));
        assert!(matches!(
            ChannelTiedTarget::from_str("0=nowhere"),
            Err(StreamOverrideError::BadTarget(_))
        ));
    }
}
