use super::controller::ChannelController;
use super::dispatcher::CommandDispatcher;
use super::mqtt::MQTT;
use super::rpc::{RpcInbox, RpcLoop, RpcLoopError};
use crate::channel::{Channel, StreamTarget};
use crate::device::{Device, MiniconfInbox};

use rumqttc::v5::mqttbytes::v5::{Packet, Publish};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ClientError, Event, EventLoop};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause before polling a dropped broker connection again.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ControlSessionError {
    #[error("error waiting for channel controller")]
    ControllerJoin(#[from] JoinError),
    #[error("MQTT client error")]
    MQTTClient(#[from] ClientError),
    #[error("failure while serving control requests")]
    Rpc(#[from] RpcLoopError),
}

/// Hands every publish arriving on the shared connection to whichever
/// component owns its topic.
pub struct MessageRouter {
    device: Option<MiniconfInbox>,
    rpc: RpcInbox,
}

impl MessageRouter {
    pub fn new(device: Option<MiniconfInbox>, rpc: RpcInbox) -> Self {
        Self { device, rpc }
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = self.rpc.subscriptions();
        if let Some(device) = &self.device {
            topics.extend(device.subscriptions());
        }
        topics
    }

    pub fn route(&self, publish: &Publish) {
        let consumed = self
            .device
            .as_ref()
            .is_some_and(|device| device.route(publish))
            || self.rpc.route(publish);
        if !consumed {
            debug!(topic = ?publish.topic, "ignoring publish on unrouted topic");
        }
    }
}

pub struct ControlSession<D> {
    /// One controller per board channel.
    controllers: Vec<ChannelController<D>>,

    /// Route into the controllers, used for start-up stream targets.
    dispatcher: CommandDispatcher,

    /// Stream targets to point channels at once the broker is reachable.
    stream_targets: Vec<(Channel, StreamTarget)>,

    /// Serves control requests arriving over MQTT.
    rpc_loop: RpcLoop,

    /// The broker connection, which must be polled for anything to move.
    mqtt: MQTT,

    router: MessageRouter,
}

impl<D: Device> ControlSession<D> {
    pub fn new(
        controllers: Vec<ChannelController<D>>,
        dispatcher: CommandDispatcher,
        stream_targets: Vec<(Channel, StreamTarget)>,
        rpc_loop: RpcLoop,
        mqtt: MQTT,
        router: MessageRouter,
    ) -> Self {
        Self {
            controllers,
            dispatcher,
            stream_targets,
            rpc_loop,
            mqtt,
            router,
        }
    }

    pub async fn run(self) -> Result<(), ControlSessionError> {
        let MQTT(client, event_loop) = self.mqtt;
        let (connected_tx, connected) = watch::channel(false);
        tokio::try_join!(
            Self::run_all_controllers(self.controllers, connected.clone()),
            Self::run_mqtt_connection(client, event_loop, self.router, connected_tx),
            Self::run_rpc_loop(self.rpc_loop),
            Self::apply_stream_targets(self.dispatcher, self.stream_targets, connected),
        )?;
        Ok(())
    }

    async fn run_all_controllers(
        controllers: Vec<ChannelController<D>>,
        mut connected: watch::Receiver<bool>,
    ) -> Result<(), ControlSessionError> {
        // Device acknowledgments are only seen once subscribed.
        let _ = connected.wait_for(|up| *up).await;
        let mut controller_tasks = JoinSet::new();
        for controller in controllers {
            controller_tasks.spawn(controller.run());
        }

        while let Some(res) = controller_tasks.join_next().await {
            res?
        }
        Ok(())
    }

    async fn run_mqtt_connection(
        client: AsyncClient,
        mut event_loop: EventLoop,
        router: MessageRouter,
        connected: watch::Sender<bool>,
    ) -> Result<(), ControlSessionError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    for topic in router.subscriptions() {
                        // The event loop is this task; queue without waiting on it.
                        client.try_subscribe(topic, QoS::AtLeastOnce)?;
                    }
                    connected.send_replace(true);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => router.route(&publish),
                Ok(_) => {}
                Err(e) => {
                    connected.send_replace(false);
                    error!(error = %e, "MQTT connection lost, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    async fn run_rpc_loop(rpc_loop: RpcLoop) -> Result<(), ControlSessionError> {
        rpc_loop.run().await?;
        Ok(())
    }

    async fn apply_stream_targets(
        dispatcher: CommandDispatcher,
        targets: Vec<(Channel, StreamTarget)>,
        mut connected: watch::Receiver<bool>,
    ) -> Result<(), ControlSessionError> {
        if targets.is_empty() {
            return Ok(());
        }
        let _ = connected.wait_for(|up| *up).await;
        for (channel, target) in targets {
            match dispatcher.set_stream_target(channel.index(), target).await {
                Ok(_) => info!(%channel, %target, "stream target applied"),
                Err(e) => warn!(%channel, %target, error = %e, "unable to apply stream target"),
            }
        }
        Ok(())
    }
}
