mod channel;
mod device;
mod mqtt;
mod root;
mod rpc;

pub use channel::ChannelSettings;
pub use device::DeviceConfig;
pub use mqtt::MQTTConfig;
pub use root::{Config, ConfigurationError};
pub use rpc::RpcConfig;
