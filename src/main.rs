//! Control daemon for a Sinara Stabilizer running dual-iir. Accepts filter,
//! PID and stream requests over MQTT and applies them to the board safely.
use stabilizer_ctl::channel::{Channel, StreamTarget};
use stabilizer_ctl::config::Config;
use stabilizer_ctl::device::{Device, MemoryDevice, MiniconfDevice, MiniconfInbox};
use stabilizer_ctl::overrides::ChannelTiedTarget;
use stabilizer_ctl::session::{
    ChannelController, CommandDispatcher, ControlSession, ControllerSettings, MessageRouter,
    RpcLoop, MQTT,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "STABILIZER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(name = env!("CARGO_BIN_NAME"))]
/// Stabilizer dual-iir control daemon
///
/// Any setting may also be given in the environment, e.g.
/// STABILIZER__DEVICE__ACK_TIMEOUT_MS=500.
///
/// JSON Configuration Syntax:
///
/// Config = {
///     "mqtt" : MQTT,
///     "device" : Device,
///     ( "rpc" : { "prefix" : string } )*,
///     ( "pid_scaling" : { ( "p" | "i" | "d" : Scaling )* } )*,
///     ( "channels" : [ Channel* ] )*
/// };
/// MQTT = {
///     "host" : string,
///     ( "port" : number )*,
///     ( "client_id" : string )*,
///     ( "username" : string )*,
///     ( "password" : string )*,
///     ( "keep_alive_s" : number )*,
/// };
/// Device = {
///     "prefix" : string,
///     ( "sample_rate_hz" : number )*,
///     ( "ack_timeout_ms" : number )*,
///     ( "write_retries" : number )*,
///     ( "reapply_on_start" : bool )*,
///     ( "queue_depth" : number )*,
/// };
/// Scaling = { ( "scale" : number )*, ( "bits" : number )* };
/// Channel = {
///     ( "limits" : { ( "voltage" | "offset" | "gain" : Range )* } )*,
///     ( "default_output" : Range )*,
///     ( "stream_target" : "ip[:port]" )*,
/// };
/// Range = { "min" : number, "max" : number };
pub struct Cli {
    /// Configuration file to use (JSON format)
    #[arg(short = 'c')]
    config_path: PathBuf,

    /// Point a channel's monitoring stream somewhere at start-up, replacing
    /// the configured target.
    #[arg(short = 's', value_names = ["channel=ip[:port]"])]
    stream_target: Vec<ChannelTiedTarget>,

    /// Acknowledge every device command locally instead of talking to the
    /// board. Control requests are still served over MQTT.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::new(&cli.config_path, ENV_PREFIX, ENV_SEPARATOR)
        .context("Failed to load configuration")?;

    let mqtt = MQTT::from_config(&config.mqtt);
    if cli.dry_run {
        info!("dry run, device commands are acknowledged locally");
        let device = Arc::new(MemoryDevice::new());
        configure_control_session(&cli, &config, device, mqtt, None)
            .run()
            .await?;
    } else {
        let (device, inbox) =
            MiniconfDevice::new(mqtt.0.clone(), &config.device.prefix, &config.mqtt.client_id);
        info!(prefix = %config.device.prefix, "controlling device");
        configure_control_session(&cli, &config, Arc::new(device), mqtt, Some(inbox))
            .run()
            .await?;
    }
    Ok(())
}

// Configure an entire daemon session from command line arguments and
// configuration file.
fn configure_control_session<D: Device>(
    cli: &Cli,
    config: &Config,
    device: Arc<D>,
    mqtt: MQTT,
    device_inbox: Option<MiniconfInbox>,
) -> ControlSession<D> {
    let (controllers, handles): (Vec<_>, Vec<_>) = Channel::all()
        .map(|channel| {
            let settings = ControllerSettings::from_config(config, channel);
            ChannelController::new(channel, device.clone(), settings)
        })
        .unzip();
    let dispatcher = CommandDispatcher::new(handles);
    let (rpc_loop, rpc_inbox) = RpcLoop::new(
        dispatcher.clone(),
        mqtt.0.clone(),
        &config.rpc.prefix,
        config.device.queue_depth * Channel::max(),
    );
    let router = MessageRouter::new(device_inbox, rpc_inbox);
    let targets = stream_targets(config, &cli.stream_target);
    ControlSession::new(controllers, dispatcher, targets, rpc_loop, mqtt, router)
}

/// Start-up stream targets: the configured ones, with command line
/// overrides taking precedence per channel.
fn stream_targets(config: &Config, overrides: &[ChannelTiedTarget]) -> Vec<(Channel, StreamTarget)> {
    Channel::all()
        .filter_map(|channel| {
            overrides
                .iter()
                .rev()
                .find(|tied| tied.channel == channel)
                .map(|tied| tied.target)
                .or(config.channel(channel).stream_target)
                .map(|target| (channel, target))
        })
        .collect()
}
