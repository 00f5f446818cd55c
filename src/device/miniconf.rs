use super::{Device, DeviceError, DevicePayload};
use crate::channel::{Channel, StreamTarget};
use rumqttc::v5::mqttbytes::v5::{Publish, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::AsyncClient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Liveness as last announced by the board on `<prefix>/alive`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Alive,
    Offline,
}

/// Periodic board measurements published on `<prefix>/telemetry`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub cpu_temp: f64,
    #[serde(default)]
    pub adcs: Vec<f64>,
    #[serde(default)]
    pub dacs: Vec<f64>,
}

#[derive(Debug)]
enum Reply {
    Ack,
    Refused(String),
    Offline,
}

#[derive(Default)]
struct PendingReplies(Mutex<HashMap<u64, oneshot::Sender<Reply>>>);

impl PendingReplies {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, id: u64, reply: Reply) {
        match self.lock().remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => debug!(id, "response for a request nobody is waiting on"),
        }
    }

    fn abandon_all(&self) {
        for (_, waiter) in self.lock().drain() {
            let _ = waiter.send(Reply::Offline);
        }
    }
}

/// Removes a request's reply slot however the request ends.
struct Registration<'a> {
    pending: &'a PendingReplies,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

/// A Stabilizer reached through Miniconf settings over MQTT v5.
///
/// Every command is a setting write that waits for the board's response
/// on a per-client response topic, matched by correlation data.
pub struct MiniconfDevice {
    client: AsyncClient,
    prefix: String,
    response_topic: String,
    pending: Arc<PendingReplies>,
    next_id: AtomicU64,
    status: watch::Receiver<DeviceStatus>,
    telemetry: watch::Receiver<Option<Telemetry>>,
}

/// The receiving half of a [`MiniconfDevice`]. Fed every publish that
/// arrives on the shared MQTT connection.
pub struct MiniconfInbox {
    prefix: String,
    response_topic: String,
    pending: Arc<PendingReplies>,
    status: watch::Sender<DeviceStatus>,
    telemetry: watch::Sender<Option<Telemetry>>,
}

impl MiniconfDevice {
    pub fn new(client: AsyncClient, prefix: &str, client_id: &str) -> (Self, MiniconfInbox) {
        let prefix = prefix.trim_end_matches('/').to_string();
        let response_topic = format!("{prefix}/response/{client_id}");
        let pending = Arc::new(PendingReplies::default());
        let (status_tx, status_rx) = watch::channel(DeviceStatus::Unknown);
        let (telemetry_tx, telemetry_rx) = watch::channel(None);
        let device = Self {
            client,
            prefix: prefix.clone(),
            response_topic: response_topic.clone(),
            pending: pending.clone(),
            next_id: AtomicU64::new(0),
            status: status_rx,
            telemetry: telemetry_rx,
        };
        let inbox = MiniconfInbox {
            prefix,
            response_topic,
            pending,
            status: status_tx,
            telemetry: telemetry_tx,
        };
        (device, inbox)
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.borrow()
    }

    pub fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry.borrow().clone()
    }

    async fn set<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<(), DeviceError> {
        if self.status() == DeviceStatus::Offline {
            return Err(DeviceError::Unresponsive(format!(
                "{} reports it is not alive",
                self.prefix
            )));
        }
        let payload = serde_json::to_vec(value)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, reply) = oneshot::channel();
        self.pending.lock().insert(id, waiter);
        let _registration = Registration {
            pending: &self.pending,
            id,
        };

        let properties = PublishProperties {
            response_topic: Some(self.response_topic.clone()),
            correlation_data: Some(id.to_be_bytes().to_vec().into()),
            ..Default::default()
        };
        debug!(path, id, "writing setting");
        self.client
            .publish_with_properties(
                format!("{}/settings{}", self.prefix, path),
                QoS::AtLeastOnce,
                false,
                payload,
                properties,
            )
            .await?;

        match reply.await {
            Ok(Reply::Ack) => Ok(()),
            Ok(Reply::Refused(message)) => Err(DeviceError::Rejected {
                path: path.to_string(),
                message,
            }),
            Ok(Reply::Offline) | Err(_) => Err(DeviceError::Unresponsive(format!(
                "{} went away while {path} was pending",
                self.prefix
            ))),
        }
    }
}

impl Device for MiniconfDevice {
    async fn hold(&self, channel: Channel) -> Result<(), DeviceError> {
        self.set(&format!("/ch/{}/run", channel.index()), "Hold")
            .await
    }

    async fn write_config(
        &self,
        channel: Channel,
        payload: &DevicePayload,
    ) -> Result<(), DeviceError> {
        for (stage, settings) in payload.stages.iter().enumerate() {
            let base = format!("/ch/{}/biquad/{stage}", channel.index());
            self.set(&format!("{base}/repr/{}", settings.typ()), settings)
                .await?;
            self.set(&format!("{base}/typ"), settings.typ()).await?;
        }
        Ok(())
    }

    async fn run(&self, channel: Channel) -> Result<(), DeviceError> {
        self.set(&format!("/ch/{}/run", channel.index()), "Run")
            .await
    }

    async fn set_stream_target(
        &self,
        _channel: Channel,
        target: &StreamTarget,
    ) -> Result<(), DeviceError> {
        self.set("/stream", &target.to_string()).await
    }
}

impl MiniconfInbox {
    /// Topics that must be subscribed for this inbox to see its traffic.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![
            self.response_topic.clone(),
            format!("{}/alive", self.prefix),
            format!("{}/telemetry", self.prefix),
        ]
    }

    /// Consume `publish` if it belongs to this device.
    pub fn route(&self, publish: &Publish) -> bool {
        let Ok(topic) = std::str::from_utf8(&publish.topic) else {
            return false;
        };
        self.route_parts(topic, &publish.payload, publish.properties.as_ref())
    }

    fn route_parts(
        &self,
        topic: &str,
        payload: &[u8],
        properties: Option<&PublishProperties>,
    ) -> bool {
        if topic == self.response_topic {
            self.respond(payload, properties);
            return true;
        }
        match topic.strip_prefix(self.prefix.as_str()) {
            Some("/alive") => {
                self.set_status(parse_alive(payload));
                true
            }
            Some("/telemetry") => {
                match serde_json::from_slice::<Telemetry>(payload) {
                    Ok(telemetry) => {
                        self.telemetry.send_replace(Some(telemetry));
                    }
                    Err(e) => warn!(error = %e, "unparsable telemetry"),
                }
                true
            }
            _ => false,
        }
    }

    fn respond(&self, payload: &[u8], properties: Option<&PublishProperties>) {
        let Some(properties) = properties else {
            warn!("response without properties");
            return;
        };
        let id = properties
            .correlation_data
            .as_ref()
            .and_then(|data| <[u8; 8]>::try_from(data.as_ref()).ok())
            .map(u64::from_be_bytes);
        let Some(id) = id else {
            warn!("response without usable correlation data");
            return;
        };
        let code = properties
            .user_properties
            .iter()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.as_str());
        let reply = match code {
            Some("Continue") => return,
            Some("Ok") => Reply::Ack,
            other => {
                let message = String::from_utf8_lossy(payload).into_owned();
                warn!(id, code = other.unwrap_or("none"), %message, "setting refused");
                Reply::Refused(message)
            }
        };
        self.pending.complete(id, reply);
    }

    fn set_status(&self, status: DeviceStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(prefix = %self.prefix, ?status, "device liveness changed");
        }
        if status == DeviceStatus::Offline {
            self.pending.abandon_all();
        }
    }
}

fn parse_alive(payload: &[u8]) -> DeviceStatus {
    let alive = match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(serde_json::Value::Bool(alive)) => alive,
        Ok(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Ok(serde_json::Value::String(s)) => !(s.is_empty() || s == "0" || s == "false"),
        Ok(serde_json::Value::Null) | Err(_) => false,
        Ok(_) => true,
    };
    if alive {
        DeviceStatus::Alive
    } else {
        DeviceStatus::Offline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::{EventLoop, MqttOptions};

    fn device() -> (MiniconfDevice, MiniconfInbox, EventLoop) {
        let options = MqttOptions::new("stabilizerd-test", "localhost", 1883);
        let (client, event_loop) = AsyncClient::new(options, 16);
        let (device, inbox) = MiniconfDevice::new(client, "dt/sinara/dual-iir/01-02/", "ctl");
        (device, inbox, event_loop)
    }

    fn response(id: u64, code: &str) -> PublishProperties {
        PublishProperties {
            correlation_data: Some(id.to_be_bytes().to_vec().into()),
            user_properties: vec![("code".to_string(), code.to_string())],
            ..Default::default()
        }
    }

    async fn wait_for_request(inbox: &MiniconfInbox) {
        while inbox.pending.lock().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn subscribes_to_response_and_status() {
        let (_device, inbox, _event_loop) = device();
        assert_eq!(
            inbox.subscriptions(),
            vec![
                "dt/sinara/dual-iir/01-02/response/ctl".to_string(),
                "dt/sinara/dual-iir/01-02/alive".to_string(),
                "dt/sinara/dual-iir/01-02/telemetry".to_string(),
            ]
        );
    }

    #[test]
    fn alive_payloads() {
        assert_eq!(parse_alive(b"1"), DeviceStatus::Alive);
        assert_eq!(parse_alive(b"true"), DeviceStatus::Alive);
        assert_eq!(parse_alive(b"0"), DeviceStatus::Offline);
        assert_eq!(parse_alive(b""), DeviceStatus::Offline);
        assert_eq!(parse_alive(b"\"\""), DeviceStatus::Offline);
    }

    #[test]
    fn telemetry_is_mirrored() {
        let (device, inbox, _event_loop) = device();
        let consumed = inbox.route_parts(
            "dt/sinara/dual-iir/01-02/telemetry",
            br#"{"cpu_temp": 41.5, "adcs": [0.1, -0.2], "dacs": [1.0, 2.0], "digital_inputs": [false, false]}"#,
            None,
        );
        assert!(consumed);
        let telemetry = device.telemetry().expect("telemetry");
        assert_eq!(telemetry.cpu_temp, 41.5);
        assert_eq!(telemetry.dacs, vec![1.0, 2.0]);
        assert!(!inbox.route_parts("elsewhere/telemetry", b"{}", None));
    }

    #[tokio::test]
    async fn ok_code_acknowledges() {
        let (device, inbox, _event_loop) = device();
        let request = tokio::spawn(async move { device.hold(Channel::Ch0).await });
        wait_for_request(&inbox).await;
        let topic = "dt/sinara/dual-iir/01-02/response/ctl";
        assert!(inbox.route_parts(topic, b"", Some(&response(0, "Continue"))));
        assert!(inbox.route_parts(topic, b"", Some(&response(0, "Ok"))));
        request.await.expect("join").expect("acknowledged");
        assert!(inbox.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn error_code_refuses() {
        let (device, inbox, _event_loop) = device();
        let request = tokio::spawn(async move { device.run(Channel::Ch1).await });
        wait_for_request(&inbox).await;
        inbox.route_parts(
            "dt/sinara/dual-iir/01-02/response/ctl",
            b"Deserialization error",
            Some(&response(0, "Error")),
        );
        match request.await.expect("join") {
            Err(DeviceError::Rejected { path, message }) => {
                assert_eq!(path, "/ch/1/run");
                assert_eq!(message, "Deserialization error");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_device_fails_fast_and_abandons_waiters() {
        let (device, inbox, _event_loop) = device();
        let device = Arc::new(device);
        let waiting = device.clone();
        let request = tokio::spawn(async move { waiting.hold(Channel::Ch0).await });
        wait_for_request(&inbox).await;
        inbox.route_parts("dt/sinara/dual-iir/01-02/alive", b"0", None);
        assert!(matches!(
            request.await.expect("join"),
            Err(DeviceError::Unresponsive(_))
        ));
        assert_eq!(device.status(), DeviceStatus::Offline);
        assert!(matches!(
            device.run(Channel::Ch0).await,
            Err(DeviceError::Unresponsive(_))
        ));
    }
}
