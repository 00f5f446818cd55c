mod control_session;
mod controller;
mod dispatcher;
mod error;
mod mqtt;
mod rpc;
mod sequence;

pub use control_session::{ControlSession, ControlSessionError, MessageRouter};
pub use controller::{
    ChannelController, ChannelHandle, ControllerSettings, FilterSelection, Proposal, RawSelection,
};
pub use dispatcher::CommandDispatcher;
pub use error::{ControlError, ErrorKind};
pub use mqtt::MQTT;
pub use rpc::{decode, execute, Operation, RpcFailure, RpcInbox, RpcLoop, RpcLoopError, RpcRequest, RpcResponse};
pub use sequence::StepTiming;
