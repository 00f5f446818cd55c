use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Port the stream receiver listens on unless told otherwise.
pub const DEFAULT_STREAM_PORT: u16 = 9293;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamTargetError {
    #[error("stream target is neither an IP address nor ip:port")]
    Unparsable,
}

/// Destination of a channel's live monitoring stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamTarget(SocketAddr);

impl StreamTarget {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl FromStr for StreamTarget {
    type Err = StreamTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self(addr));
        }
        s.parse::<IpAddr>()
            .map(|ip| Self(SocketAddr::new(ip, DEFAULT_STREAM_PORT)))
            .map_err(|_| StreamTargetError::Unparsable)
    }
}

impl TryFrom<String> for StreamTarget {
    type Error = StreamTargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StreamTarget> for String {
    fn from(value: StreamTarget) -> Self {
        value.to_string()
    }
}

impl Display for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
