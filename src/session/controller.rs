use super::error::ControlError;
use super::sequence::{Failure, Link, Running, StateTracker, StepTiming};
use crate::channel::{
    pad_stages, Channel, ChannelConfig, ChannelMode, ChannelState, StateTransition, StreamTarget,
    STAGES_PER_CHANNEL,
};
use crate::config::Config;
use crate::device::{Device, DevicePayload};
use crate::safety::{validate, SafetyLimits};
use crate::signal::{
    compute_biquad, compute_pid, BiquadCoefficients, FilterSpec, PidScaling, PidSpec,
};
use crate::units::Range;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{info, warn};

const TRANSITION_BACKLOG: usize = 32;

/// Up to two designed stages, with optional offset and output limits.
/// Anything left out is carried over from the channel's current settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSelection {
    pub stages: Vec<FilterSpec>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub output_limits: Option<Range>,
}

/// Explicit coefficients for each stage, uploaded without a design step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSelection {
    pub stages: Vec<BiquadCoefficients>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub output_limits: Option<Range>,
}

/// A requested change of channel settings.
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Filters(FilterSelection),
    Raw(RawSelection),
    Pid(PidSpec),
}

impl Proposal {
    /// Work out the whole configuration this proposal would leave the
    /// channel in, starting from `current`.
    fn resolve(
        &self,
        current: &ChannelConfig,
        sample_rate_hz: f64,
        scaling: &PidScaling,
    ) -> Result<ChannelConfig, ControlError> {
        let (mode, offset, output_limits) = match self {
            Proposal::Filters(selection) => {
                if selection.stages.len() > STAGES_PER_CHANNEL {
                    return Err(ControlError::InvalidParameter(format!(
                        "{} filter stages requested, a channel has {STAGES_PER_CHANNEL}",
                        selection.stages.len()
                    )));
                }
                let stages = selection
                    .stages
                    .iter()
                    .map(|spec| compute_biquad(spec, sample_rate_hz))
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    ChannelMode::Raw {
                        stages: pad_stages(stages),
                    },
                    selection.offset.unwrap_or(current.offset),
                    selection.output_limits.unwrap_or(current.output_limits),
                )
            }
            Proposal::Raw(selection) => (
                ChannelMode::Raw {
                    stages: pad_stages(selection.stages.clone()),
                },
                selection.offset.unwrap_or(current.offset),
                selection.output_limits.unwrap_or(current.output_limits),
            ),
            Proposal::Pid(spec) => {
                let scaled = compute_pid(spec, scaling)?;
                (
                    ChannelMode::Pid {
                        spec: spec.clone(),
                        scaled,
                    },
                    current.offset,
                    spec.output_limits.unwrap_or(current.output_limits),
                )
            }
        };
        if !offset.is_finite() {
            return Err(ControlError::InvalidParameter(format!(
                "offset must be finite, got {offset}"
            )));
        }
        if !output_limits.is_ordered() {
            return Err(ControlError::InvalidParameter(format!(
                "output limits {output_limits} must be finite with lower <= upper"
            )));
        }
        Ok(ChannelConfig {
            mode,
            offset,
            output_limits,
            stream_target: current.stream_target,
        })
    }
}

type Reply = oneshot::Sender<Result<Arc<ChannelConfig>, ControlError>>;

pub(super) enum ChannelRequest {
    Reload { proposal: Proposal, reply: Reply },
    Retarget { target: StreamTarget, reply: Reply },
}

/// Everything a controller needs to know at start-up.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub sample_rate_hz: f64,
    pub pid_scaling: PidScaling,
    pub limits: SafetyLimits,
    pub timing: StepTiming,
    pub initial: ChannelConfig,
    pub queue_depth: usize,
    /// Push `initial` to the device before serving requests.
    pub reapply_on_start: bool,
}

impl ControllerSettings {
    pub fn from_config(config: &Config, channel: Channel) -> Self {
        let settings = config.channel(channel);
        Self {
            sample_rate_hz: config.device.sample_rate_hz,
            pid_scaling: config.pid_scaling.clone(),
            limits: settings.limits,
            timing: StepTiming {
                ack_timeout: Duration::from_millis(config.device.ack_timeout_ms),
                write_retries: config.device.write_retries,
            },
            initial: ChannelConfig::passthrough(settings.default_output),
            queue_depth: config.device.queue_depth,
            reapply_on_start: config.device.reapply_on_start,
        }
    }
}

/// The outside view of one channel controller.
#[derive(Clone)]
pub struct ChannelHandle {
    channel: Channel,
    requests: mpsc::Sender<ChannelRequest>,
    config: watch::Receiver<Arc<ChannelConfig>>,
    state: watch::Receiver<ChannelState>,
    transitions: broadcast::Sender<StateTransition>,
}

impl ChannelHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The configuration the device is currently running with.
    pub fn config(&self) -> Arc<ChannelConfig> {
        self.config.borrow().clone()
    }

    pub fn watch_config(&self) -> watch::Receiver<Arc<ChannelConfig>> {
        self.config.clone()
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.transitions.subscribe()
    }

    pub(super) async fn reload(&self, proposal: Proposal) -> Result<Arc<ChannelConfig>, ControlError> {
        self.request(|reply| ChannelRequest::Reload { proposal, reply })
            .await
    }

    pub(super) async fn retarget(
        &self,
        target: StreamTarget,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        self.request(|reply| ChannelRequest::Retarget { target, reply })
            .await
    }

    async fn request(
        &self,
        request: impl FnOnce(Reply) -> ChannelRequest,
    ) -> Result<Arc<ChannelConfig>, ControlError> {
        let stopped = || {
            ControlError::DeviceUnresponsive(format!(
                "controller for channel {} has stopped",
                self.channel
            ))
        };
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .await
            .map_err(|_| stopped())?;
        response.await.map_err(|_| stopped())?
    }
}

/// Sole owner of one channel's configuration. Serves requests strictly in
/// arrival order, one full sequence at a time.
pub struct ChannelController<D> {
    channel: Channel,
    device: Arc<D>,
    sample_rate_hz: f64,
    pid_scaling: PidScaling,
    limits: SafetyLimits,
    timing: StepTiming,
    reapply_on_start: bool,
    requests: mpsc::Receiver<ChannelRequest>,
    config: watch::Sender<Arc<ChannelConfig>>,
    tracker: StateTracker,
}

impl<D: Device> ChannelController<D> {
    pub fn new(
        channel: Channel,
        device: Arc<D>,
        settings: ControllerSettings,
    ) -> (Self, ChannelHandle) {
        let (requests_tx, requests_rx) = mpsc::channel(settings.queue_depth.max(1));
        let (config_tx, config_rx) = watch::channel(Arc::new(settings.initial));
        let (state_tx, state_rx) = watch::channel(ChannelState::Run);
        let (transitions, _) = broadcast::channel(TRANSITION_BACKLOG);

        let handle = ChannelHandle {
            channel,
            requests: requests_tx,
            config: config_rx,
            state: state_rx,
            transitions: transitions.clone(),
        };
        let controller = Self {
            channel,
            device,
            sample_rate_hz: settings.sample_rate_hz,
            pid_scaling: settings.pid_scaling,
            limits: settings.limits,
            timing: settings.timing,
            reapply_on_start: settings.reapply_on_start,
            requests: requests_rx,
            config: config_tx,
            tracker: StateTracker::new(channel, state_tx, transitions),
        };
        (controller, handle)
    }

    /// The validated configuration `proposal` would produce, without
    /// touching the device.
    pub fn propose(&self, proposal: &Proposal) -> Result<ChannelConfig, ControlError> {
        let current = self.config.borrow().clone();
        let config = proposal.resolve(&current, self.sample_rate_hz, &self.pid_scaling)?;
        validate(&config, &self.limits)?;
        Ok(config)
    }

    pub async fn run(mut self) {
        info!(channel = %self.channel, "channel controller started");
        if self.reapply_on_start {
            let initial = ChannelConfig::clone(&self.config.borrow());
            let applied = match validate(&initial, &self.limits) {
                Ok(()) => self.apply(initial).await,
                Err(rejection) => Err(rejection.into()),
            };
            if let Err(e) = applied {
                warn!(channel = %self.channel, error = %e, "unable to restore start-up settings");
            }
        }

        while let Some(request) = self.requests.recv().await {
            let (result, reply) = match request {
                ChannelRequest::Reload { proposal, reply } => {
                    let result = match self.propose(&proposal) {
                        Ok(config) => self.apply(config).await,
                        Err(e) => Err(e),
                    };
                    (result, reply)
                }
                ChannelRequest::Retarget { target, reply } => (self.retarget(target).await, reply),
            };
            if let Err(e) = &result {
                warn!(
                    channel = %self.channel,
                    state = %self.tracker.current(),
                    kind = ?e.kind(),
                    error = %e,
                    "request refused"
                );
            }
            // The caller may have given up waiting; the outcome stands.
            let _ = reply.send(result);
        }
        info!(channel = %self.channel, "channel controller stopped");
    }

    async fn apply(&self, config: ChannelConfig) -> Result<Arc<ChannelConfig>, ControlError> {
        let payload = DevicePayload::from_config(&config);
        let applied = Arc::new(config);
        let link = Link::new(self.device.as_ref(), self.channel, self.timing, &self.tracker);
        let commit = || {
            self.config.send_replace(applied.clone());
        };
        match Self::sequence(link, &payload, commit).await {
            Ok(running) => {
                info!(
                    channel = %running.channel(),
                    state = %ChannelState::Run,
                    pid = applied.is_pid(),
                    "new settings applied"
                );
                Ok(applied)
            }
            Err(failure) => Err(failure.error),
        }
    }

    async fn sequence<'a>(
        link: Link<'a, D>,
        payload: &DevicePayload,
        commit: impl FnOnce(),
    ) -> Result<Running<'a, D>, Failure<'a, D>> {
        let held = link.begin().hold().await?;
        let reloading = held.reload(payload).await?;
        reloading.run(commit).await
    }

    async fn retarget(&self, target: StreamTarget) -> Result<Arc<ChannelConfig>, ControlError> {
        let command = self.device.set_stream_target(self.channel, &target);
        match timeout(self.timing.ack_timeout, command).await {
            Ok(acked) => acked?,
            Err(_) => return Err(ControlError::AckTimeout),
        }
        let current = self.config.borrow().clone();
        let updated = Arc::new(ChannelConfig {
            stream_target: Some(target),
            ..ChannelConfig::clone(&current)
        });
        self.config.send_replace(updated.clone());
        info!(channel = %self.channel, %target, "stream target updated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Command, Fault, MemoryDevice, Step};
    use crate::signal::SecondOrder;

    fn settings() -> ControllerSettings {
        ControllerSettings {
            sample_rate_hz: 781_250.0,
            pid_scaling: PidScaling::default(),
            limits: SafetyLimits::default(),
            timing: StepTiming {
                ack_timeout: Duration::from_millis(200),
                write_retries: 1,
            },
            initial: ChannelConfig::passthrough(Range::symmetric(2.0)),
            queue_depth: 4,
            reapply_on_start: false,
        }
    }

    fn spawn(
        device: &Arc<MemoryDevice>,
        settings: ControllerSettings,
    ) -> ChannelHandle {
        let (controller, handle) = ChannelController::new(Channel::Ch0, device.clone(), settings);
        tokio::spawn(controller.run());
        handle
    }

    fn lowpass(frequency_hz: f64) -> FilterSpec {
        FilterSpec::Lowpass(SecondOrder {
            frequency_hz,
            q: std::f64::consts::FRAC_1_SQRT_2,
        })
    }

    fn filters(stages: Vec<FilterSpec>) -> Proposal {
        Proposal::Filters(FilterSelection {
            stages,
            offset: None,
            output_limits: None,
        })
    }

    #[tokio::test]
    async fn filter_selection_pads_and_carries_limits() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let applied = handle
            .reload(filters(vec![lowpass(1_000.0)]))
            .await
            .expect("applied");
        let ChannelMode::Raw { stages } = &applied.mode else {
            panic!("expected raw mode");
        };
        assert_eq!(stages.len(), 2);
        assert!(stages[1].is_identity());
        assert_eq!(applied.output_limits, Range::symmetric(2.0));
        assert_eq!(handle.config(), applied);
        assert_eq!(handle.state(), ChannelState::Run);
        assert_eq!(device.written(Channel::Ch0), Some(DevicePayload::from_config(&applied)));
    }

    #[tokio::test]
    async fn three_filters_refused_before_device() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let result = handle
            .reload(filters(vec![lowpass(1e3), lowpass(2e3), lowpass(3e3)]))
            .await;
        assert!(matches!(result, Err(ControlError::InvalidParameter(_))));
        assert!(device.received().is_empty());
    }

    #[tokio::test]
    async fn explicit_coefficients_beyond_two_stages() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let result = handle
            .reload(Proposal::Raw(RawSelection {
                stages: vec![BiquadCoefficients::IDENTITY; 3],
                offset: None,
                output_limits: None,
            }))
            .await;
        assert_eq!(result, Err(ControlError::TooManyStages(3)));
        assert!(device.received().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_holds_then_next_request_recovers() {
        let device = Arc::new(MemoryDevice::new());
        device.fail_next(Channel::Ch0, Step::Run, Fault::Silent);
        let handle = spawn(&device, settings());
        let before = handle.config();

        let result = handle.reload(filters(vec![lowpass(1e3)])).await;
        assert_eq!(result, Err(ControlError::AckTimeout));
        assert_eq!(handle.state(), ChannelState::Held);
        assert_eq!(handle.config(), before);

        handle
            .reload(filters(vec![lowpass(1e3)]))
            .await
            .expect("second attempt");
        assert_eq!(handle.state(), ChannelState::Run);
        let steps: Vec<_> = device.received().iter().map(Command::step).collect();
        assert_eq!(
            steps,
            vec![
                Step::Hold,
                Step::WriteConfig,
                Step::Run,
                Step::Hold,
                Step::WriteConfig,
                Step::Run
            ]
        );
    }

    #[tokio::test]
    async fn pid_replaces_limits_and_keeps_offset() {
        let device = Arc::new(MemoryDevice::new());
        let mut settings = settings();
        settings.initial.offset = 0.5;
        let handle = spawn(&device, settings);
        let applied = handle
            .reload(Proposal::Pid(PidSpec {
                kp: 2.0,
                ki: 0.0,
                kd: 0.0,
                setpoint: 0.0,
                output_limits: Some(Range::symmetric(5.0)),
                integrator_limits: None,
            }))
            .await
            .expect("applied");
        assert!(applied.is_pid());
        assert_eq!(applied.offset, 0.5);
        assert_eq!(applied.output_limits, Range::symmetric(5.0));
    }

    #[tokio::test]
    async fn stream_target_skips_the_handshake() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let mut transitions = handle.subscribe();
        let target: StreamTarget = "10.0.0.2".parse().expect("target");
        let updated = handle.retarget(target).await.expect("retargeted");
        assert_eq!(updated.stream_target, Some(target));
        assert_eq!(updated.mode, ChannelConfig::passthrough(Range::symmetric(2.0)).mode);
        assert_eq!(
            device.received(),
            vec![Command::SetStreamTarget(Channel::Ch0, target)]
        );
        assert!(transitions.try_recv().is_err());

        // Later reloads keep the target.
        let applied = handle
            .reload(filters(vec![lowpass(1e3)]))
            .await
            .expect("applied");
        assert_eq!(applied.stream_target, Some(target));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_stream_target_changes_nothing() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let first: StreamTarget = "10.0.0.2".parse().expect("target");
        handle.retarget(first).await.expect("retargeted");
        let before = handle.config();
        let mut transitions = handle.subscribe();

        let second: StreamTarget = "10.0.0.3:4000".parse().expect("target");
        for (fault, expected) in [
            (Fault::Silent, ControlError::AckTimeout),
            (Fault::Reject, ControlError::DeviceUnresponsive(String::new())),
            (Fault::Unresponsive, ControlError::DeviceUnresponsive(String::new())),
        ] {
            device.fail_next(Channel::Ch0, Step::SetStreamTarget, fault);
            let err = handle.retarget(second).await.expect_err("refused");
            assert_eq!(err.kind(), expected.kind(), "{fault:?}");
            assert_eq!(handle.config(), before, "{fault:?}");
            assert_eq!(handle.config().stream_target, Some(first));
            assert_eq!(handle.state(), ChannelState::Run, "{fault:?}");
        }
        assert!(transitions.try_recv().is_err());
        assert_eq!(device.stream_target(), Some(first));
    }

    #[tokio::test]
    async fn non_finite_offset_or_limits_are_invalid() {
        let device = Arc::new(MemoryDevice::new());
        let handle = spawn(&device, settings());
        let before = handle.config();
        for (offset, output_limits) in [
            (Some(f64::NAN), None),
            (Some(f64::INFINITY), None),
            (None, Some(Range::new(f64::NEG_INFINITY, 1.0))),
            (None, Some(Range::new(1.0, -1.0))),
        ] {
            let result = handle
                .reload(Proposal::Filters(FilterSelection {
                    stages: vec![FilterSpec::Passthrough],
                    offset,
                    output_limits,
                }))
                .await;
            assert!(
                matches!(result, Err(ControlError::InvalidParameter(_))),
                "{offset:?} {output_limits:?}: {result:?}"
            );
        }
        assert_eq!(handle.config(), before);
        assert!(device.received().is_empty());
    }

    #[tokio::test]
    async fn reapplies_initial_settings_on_start() {
        let device = Arc::new(MemoryDevice::new());
        let mut settings = settings();
        settings.reapply_on_start = true;
        let handle = spawn(&device, settings);
        // Served after the start-up sequence.
        handle
            .reload(filters(vec![]))
            .await
            .expect("applied");
        let steps: Vec<_> = device.received().iter().map(Command::step).collect();
        assert_eq!(steps.len(), 6);
        assert_eq!(handle.state(), ChannelState::Run);
    }
}
