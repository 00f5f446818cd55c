//! Control requests carried as JSON over MQTT.
//!
//! A request is published on `<prefix>/request`:
//!
//! ```json
//! {"id": 7, "op": "select_filter", "channel": 0,
//!  "filter": {"kind": "lowpass", "frequency_hz": 1000.0, "q": 0.707}}
//! ```
//!
//! and answered on `<prefix>/response`, or on the MQTT v5 response topic
//! named by the request, with correlation data echoed back:
//!
//! ```json
//! {"id": 7, "ok": true, "state": "run", "config": {...}}
//! ```
//!
//! Every request is answered. One that cannot be decoded gets an
//! `InvalidParameter` failure carrying whatever `id` could be recovered, and
//! one that arrives while the backlog is full gets `DeviceUnresponsive`.
use super::controller::{FilterSelection, RawSelection};
use super::dispatcher::CommandDispatcher;
use super::error::{ControlError, ErrorKind};
use crate::channel::{ChannelConfig, ChannelState, StreamTarget};
use crate::signal::{BiquadCoefficients, FilterSpec, PidSpec};
use crate::units::Range;
use rumqttc::v5::mqttbytes::v5::{Publish, PublishProperties};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ClientError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RpcLoopError {
    #[error("error publishing MQTT topic")]
    MQTTClientError(#[from] ClientError),
    #[error("unable to encode response")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    SelectFilter {
        channel: usize,
        filter: FilterSpec,
    },
    SelectFilters {
        channel: usize,
        stages: Vec<FilterSpec>,
        #[serde(default)]
        offset: Option<f64>,
        #[serde(default)]
        output_limits: Option<Range>,
    },
    ApplyRaw {
        channel: usize,
        stages: Vec<BiquadCoefficients>,
        #[serde(default)]
        offset: Option<f64>,
        #[serde(default)]
        output_limits: Option<Range>,
    },
    SetPid {
        channel: usize,
        pid: PidSpec,
    },
    SetStreamTarget {
        channel: usize,
        target: StreamTarget,
    },
    GetConfig {
        channel: usize,
    },
}

impl Operation {
    pub fn channel(&self) -> usize {
        match self {
            Operation::SelectFilter { channel, .. }
            | Operation::SelectFilters { channel, .. }
            | Operation::ApplyRaw { channel, .. }
            | Operation::SetPid { channel, .. }
            | Operation::SetStreamTarget { channel, .. }
            | Operation::GetConfig { channel } => *channel,
        }
    }
}

/// Enough of a request to address an answer when the rest is unusable.
#[derive(Debug, Deserialize)]
struct RequestHeader {
    #[serde(default)]
    id: u64,
}

fn request_id(payload: &[u8]) -> u64 {
    serde_json::from_slice::<RequestHeader>(payload)
        .map(|header| header.id)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: u64,
    #[serde(flatten)]
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ChannelState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ChannelConfig>,
}

impl RpcResponse {
    fn new(
        id: u64,
        outcome: Result<ChannelConfig, ControlError>,
        state: Option<ChannelState>,
    ) -> Self {
        match outcome {
            Ok(config) => Self {
                id,
                ok: true,
                error: None,
                state,
                config: Some(config),
            },
            Err(e) => Self {
                id,
                ok: false,
                error: Some(RpcFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
                state,
                config: None,
            },
        }
    }
}

/// Decode a request, or produce the failure to send back in its place.
pub fn decode(payload: &[u8]) -> Result<RpcRequest, RpcResponse> {
    serde_json::from_slice(payload).map_err(|e| {
        let error = ControlError::InvalidParameter(format!("malformed request: {e}"));
        RpcResponse::new(request_id(payload), Err(error), None)
    })
}

/// Carry out one operation and describe the outcome.
pub async fn execute(dispatcher: &CommandDispatcher, request: RpcRequest) -> RpcResponse {
    let channel = request.operation.channel();
    let outcome = match request.operation {
        Operation::SelectFilter { channel, filter } => {
            dispatcher.select_filter(channel, filter).await
        }
        Operation::SelectFilters {
            channel,
            stages,
            offset,
            output_limits,
        } => {
            let selection = FilterSelection {
                stages,
                offset,
                output_limits,
            };
            dispatcher.select_filters(channel, selection).await
        }
        Operation::ApplyRaw {
            channel,
            stages,
            offset,
            output_limits,
        } => {
            let selection = RawSelection {
                stages,
                offset,
                output_limits,
            };
            dispatcher.apply_raw(channel, selection).await
        }
        Operation::SetPid { channel, pid } => dispatcher.set_pid(channel, pid).await,
        Operation::SetStreamTarget { channel, target } => {
            dispatcher.set_stream_target(channel, target).await
        }
        Operation::GetConfig { channel } => dispatcher.config(channel),
    };
    let state = dispatcher.state(channel).ok();
    RpcResponse::new(
        request.id,
        outcome.map(|config| ChannelConfig::clone(&config)),
        state,
    )
}

/// A request as it came off the wire, with where to send the answer.
#[derive(Debug)]
pub struct Inbound {
    payload: Vec<u8>,
    response_topic: Option<String>,
    correlation_data: Option<Vec<u8>>,
}

impl Inbound {
    fn answer_topic(&self, default: &str) -> String {
        self.response_topic
            .clone()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Picks control requests out of the shared MQTT connection.
pub struct RpcInbox {
    request_topic: String,
    response_topic: String,
    client: AsyncClient,
    requests: mpsc::Sender<Inbound>,
}

impl RpcInbox {
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.request_topic.clone()]
    }

    /// Consume `publish` if it is a control request.
    pub fn route(&self, publish: &Publish) -> bool {
        if publish.topic[..] != *self.request_topic.as_bytes() {
            return false;
        }
        let properties = publish.properties.as_ref();
        let inbound = Inbound {
            payload: publish.payload.to_vec(),
            response_topic: properties.and_then(|p| p.response_topic.clone()),
            correlation_data: properties
                .and_then(|p| p.correlation_data.as_ref())
                .map(|data| data.to_vec()),
        };
        // Never stall the connection behind a slow request queue.
        match self.requests.try_send(inbound) {
            Ok(()) => {}
            Err(TrySendError::Full(inbound)) => {
                let id = request_id(&inbound.payload);
                warn!(id, "control request backlog full, refusing request");
                let error = ControlError::DeviceUnresponsive(
                    "control request backlog is full".to_string(),
                );
                let response = RpcResponse::new(id, Err(error), None);
                if let Err(e) = self.refuse(inbound, &response) {
                    warn!(error = %e, id, "unable to refuse control request");
                }
            }
            Err(TrySendError::Closed(_)) => warn!("control requests are no longer served"),
        }
        true
    }

    // Runs on the connection task, so the answer is queued without waiting.
    fn refuse(&self, inbound: Inbound, response: &RpcResponse) -> Result<(), RpcLoopError> {
        let topic = inbound.answer_topic(&self.response_topic);
        let body = serde_json::to_vec(response)?;
        self.client.try_publish_with_properties(
            topic,
            QoS::AtLeastOnce,
            false,
            body,
            answer_properties(inbound.correlation_data),
        )?;
        Ok(())
    }
}

/// Serves control requests, each in its own task so a slow channel never
/// holds up another.
pub struct RpcLoop {
    dispatcher: CommandDispatcher,
    client: AsyncClient,
    response_topic: String,
    requests: mpsc::Receiver<Inbound>,
}

impl RpcLoop {
    pub fn new(
        dispatcher: CommandDispatcher,
        client: AsyncClient,
        prefix: &str,
        backlog: usize,
    ) -> (Self, RpcInbox) {
        let prefix = prefix.trim_end_matches('/');
        let response_topic = format!("{prefix}/response");
        let (tx, rx) = mpsc::channel(backlog.max(1));
        let inbox = RpcInbox {
            request_topic: format!("{prefix}/request"),
            response_topic: response_topic.clone(),
            client: client.clone(),
            requests: tx,
        };
        let rpc = Self {
            dispatcher,
            client,
            response_topic,
            requests: rx,
        };
        (rpc, inbox)
    }

    pub async fn run(mut self) -> Result<(), RpcLoopError> {
        info!(topic = %self.response_topic, "control requests enabled");
        while let Some(inbound) = self.requests.recv().await {
            let topic = inbound.answer_topic(&self.response_topic);
            let client = self.client.clone();
            match decode(&inbound.payload) {
                Ok(request) => {
                    debug!(id = request.id, channel = request.operation.channel(), "control request");
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        let response = execute(&dispatcher, request).await;
                        answer(&client, topic, inbound.correlation_data, &response).await;
                    });
                }
                Err(response) => {
                    if let Some(failure) = &response.error {
                        warn!(id = response.id, error = %failure.message, "malformed control request");
                    }
                    tokio::spawn(async move {
                        answer(&client, topic, inbound.correlation_data, &response).await;
                    });
                }
            }
        }
        Ok(())
    }
}

fn answer_properties(correlation_data: Option<Vec<u8>>) -> PublishProperties {
    PublishProperties {
        correlation_data: correlation_data.map(Into::into),
        ..Default::default()
    }
}

async fn answer(
    client: &AsyncClient,
    topic: String,
    correlation_data: Option<Vec<u8>>,
    response: &RpcResponse,
) {
    if let Err(e) = respond(client, topic, correlation_data, response).await {
        warn!(error = %e, id = response.id, "unable to answer control request");
    }
}

async fn respond(
    client: &AsyncClient,
    topic: String,
    correlation_data: Option<Vec<u8>>,
    response: &RpcResponse,
) -> Result<(), RpcLoopError> {
    let body = serde_json::to_vec(response)?;
    client
        .publish_with_properties(
            topic,
            QoS::AtLeastOnce,
            false,
            body,
            answer_properties(correlation_data),
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Channel, ChannelMode};
    use crate::device::MemoryDevice;
    use crate::safety::SafetyLimits;
    use crate::session::{ChannelController, ControllerSettings, StepTiming};
    use crate::signal::PidScaling;
    use rumqttc::v5::{EventLoop, MqttOptions, Request};
    use std::sync::Arc;
    use std::time::Duration;

    fn dispatcher() -> CommandDispatcher {
        let device = Arc::new(MemoryDevice::new());
        let handles = Channel::all()
            .map(|channel| {
                let (controller, handle) = ChannelController::new(
                    channel,
                    device.clone(),
                    ControllerSettings {
                        sample_rate_hz: 781_250.0,
                        pid_scaling: PidScaling::default(),
                        limits: SafetyLimits::default(),
                        timing: StepTiming {
                            ack_timeout: Duration::from_secs(1),
                            write_retries: 0,
                        },
                        initial: ChannelConfig::passthrough(Range::symmetric(2.0)),
                        queue_depth: 4,
                        reapply_on_start: false,
                    },
                );
                tokio::spawn(controller.run());
                handle
            })
            .collect();
        CommandDispatcher::new(handles)
    }

    fn parse(json: &str) -> RpcRequest {
        serde_json::from_str(json).expect("request")
    }

    #[test]
    fn parses_every_operation() {
        let r = parse(
            r#"{"id": 3, "op": "select_filter", "channel": 1,
                "filter": {"kind": "notch", "frequency_hz": 50.0, "q": 10.0}}"#,
        );
        assert_eq!(r.id, 3);
        assert_eq!(r.operation.channel(), 1);

        let r = parse(
            r#"{"op": "select_filters", "channel": 0, "offset": 0.25,
                "stages": [{"kind": "passthrough"}, {"kind": "proportional", "gain": 2.0}]}"#,
        );
        assert!(matches!(
            r.operation,
            Operation::SelectFilters { offset: Some(o), ref stages, .. } if o == 0.25 && stages.len() == 2
        ));

        let r = parse(
            r#"{"op": "apply_raw", "channel": 0,
                "stages": [{"b0": 0.5, "b1": 0.0, "b2": 0.0, "a1": -0.5, "a2": 0.0}]}"#,
        );
        assert!(matches!(r.operation, Operation::ApplyRaw { .. }));

        let r = parse(
            r#"{"op": "set_pid", "channel": 1,
                "pid": {"kp": 1.0, "ki": 500.0, "kd": 0.0, "output_limits": {"min": -5.0, "max": 5.0}}}"#,
        );
        assert!(matches!(r.operation, Operation::SetPid { channel: 1, .. }));

        let r = parse(r#"{"op": "set_stream_target", "channel": 0, "target": "10.0.0.9"}"#);
        assert!(matches!(r.operation, Operation::SetStreamTarget { .. }));

        let r = parse(r#"{"op": "get_config", "channel": 0}"#);
        assert_eq!(r.operation, Operation::GetConfig { channel: 0 });
    }

    #[test]
    fn unknown_operation_is_malformed() {
        assert!(serde_json::from_str::<RpcRequest>(r#"{"op": "reboot", "channel": 0}"#).is_err());
    }

    #[test]
    fn undecodable_requests_become_invalid_parameter() {
        for (payload, id) in [
            (r#"{"id": 4, "op": "set_stream_target", "channel": 0, "target": "not-an-ip"}"#, 4),
            (r#"{"id": 5, "op": "select_filter", "channel": 0, "filter": {"kind": "comb"}}"#, 5),
            (r#"{"id": 6, "op": "select_filter", "channel": 0, "filter": {"kind": "lowpass", "q": 0.7}}"#, 6),
            (r#"{"id": 7, "op": "get_config", "channel": -1}"#, 7),
            (r#"{"op": "reboot"}"#, 0),
            ("not json", 0),
        ] {
            let response = decode(payload.as_bytes()).expect_err(payload);
            assert_eq!(response.id, id, "{payload}");
            assert!(!response.ok);
            let failure = response.error.expect("failure");
            assert_eq!(failure.kind, ErrorKind::InvalidParameter, "{payload}");
            assert!(failure.message.starts_with("malformed request"));
        }
        assert!(decode(br#"{"id": 8, "op": "get_config", "channel": 1}"#).is_ok());
    }

    fn client() -> (AsyncClient, EventLoop) {
        AsyncClient::new(MqttOptions::new("rpc-test", "localhost", 1883), 16)
    }

    fn request(payload: &str, correlation: &[u8]) -> Publish {
        let properties = PublishProperties {
            response_topic: Some("bench/answers".to_string()),
            correlation_data: Some(correlation.to_vec().into()),
            ..Default::default()
        };
        Publish::new("ctl/request", QoS::AtLeastOnce, payload.to_string(), Some(properties))
    }

    // Answers queued on the client so far, as (correlation data, body).
    fn answers(event_loop: &mut EventLoop) -> Vec<(Vec<u8>, serde_json::Value)> {
        event_loop.clean();
        event_loop
            .pending
            .iter()
            .filter_map(|request| match request {
                Request::Publish(publish) => Some(publish),
                _ => None,
            })
            .map(|publish| {
                assert_eq!(&publish.topic[..], b"bench/answers");
                let correlation = publish
                    .properties
                    .as_ref()
                    .and_then(|p| p.correlation_data.as_ref())
                    .map(|data| data.to_vec())
                    .unwrap_or_default();
                let body = serde_json::from_slice(&publish.payload).expect("json answer");
                (correlation, body)
            })
            .collect()
    }

    #[tokio::test]
    async fn every_request_is_answered() {
        let (client, mut event_loop) = client();
        let (rpc, inbox) = RpcLoop::new(dispatcher(), client, "ctl/", 8);
        tokio::spawn(rpc.run());

        assert!(inbox.route(&request(r#"{"id": 1, "op": "get_config", "channel": 0}"#, b"a")));
        assert!(inbox.route(&request(
            r#"{"id": 2, "op": "set_stream_target", "channel": 0, "target": "nowhere"}"#,
            b"b"
        )));
        assert!(inbox.route(&request(
            r#"{"id": 3, "op": "select_filter", "channel": 1, "filter": {"kind": "lowpass"}}"#,
            b"c"
        )));

        let mut seen = Vec::new();
        for _ in 0..200 {
            seen = answers(&mut event_loop);
            if seen.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        let kinds: Vec<_> = seen
            .iter()
            .map(|(correlation, body)| (correlation.clone(), body["id"].clone(), body["ok"].clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (b"a".to_vec(), 1.into(), true.into()),
                (b"b".to_vec(), 2.into(), false.into()),
                (b"c".to_vec(), 3.into(), false.into()),
            ]
        );
        assert_eq!(seen[1].1["error"]["kind"], "InvalidParameter");
        assert_eq!(seen[2].1["error"]["kind"], "InvalidParameter");
    }

    #[tokio::test]
    async fn full_backlog_is_refused() {
        let (client, mut event_loop) = client();
        // Nothing drains the backlog, so it fills after one request.
        let (_rpc, inbox) = RpcLoop::new(dispatcher(), client, "ctl", 1);

        assert!(inbox.route(&request(r#"{"id": 1, "op": "get_config", "channel": 0}"#, b"a")));
        assert!(answers(&mut event_loop).is_empty());
        assert!(inbox.route(&request(r#"{"id": 2, "op": "get_config", "channel": 0}"#, b"b")));

        let seen = answers(&mut event_loop);
        assert_eq!(seen.len(), 1);
        let (correlation, body) = &seen[0];
        assert_eq!(correlation, b"b");
        assert_eq!(body["id"], 2);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["kind"], "DeviceUnresponsive");
    }

    #[tokio::test]
    async fn success_carries_config() {
        let dispatcher = dispatcher();
        let response = execute(
            &dispatcher,
            parse(r#"{"id": 1, "op": "set_pid", "channel": 1, "pid": {"kp": 1.0, "ki": 500.0, "kd": 0.0}}"#),
        )
        .await;
        assert!(response.ok);
        assert_eq!(response.state, Some(ChannelState::Run));
        let config = response.config.expect("config");
        assert!(matches!(config.mode, ChannelMode::Pid { .. }));
        let json = serde_json::to_value(&RpcResponse {
            config: None,
            ..response
        })
        .expect("encode");
        assert_eq!(json, serde_json::json!({"id": 1, "ok": true, "state": "run"}));
    }

    #[tokio::test]
    async fn failure_carries_kind() {
        let dispatcher = dispatcher();
        let response = execute(
            &dispatcher,
            parse(r#"{"id": 2, "op": "get_config", "channel": 5}"#),
        )
        .await;
        assert!(!response.ok);
        assert_eq!(response.state, None);
        let json = serde_json::to_value(&response).expect("encode");
        assert_eq!(json["error"]["kind"], "InvalidParameter");
    }
}
