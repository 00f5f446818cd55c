mod config;
mod index;
mod state;
mod stream;

pub use config::{pad_stages, ChannelConfig, ChannelMode, STAGES_PER_CHANNEL};
pub use index::{Channel, ChannelError};
pub use state::{ChannelState, StateTransition};
pub use stream::{StreamTarget, StreamTargetError, DEFAULT_STREAM_PORT};
