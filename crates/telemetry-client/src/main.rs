//! Telemetry monitor: entry point.
//!
//! Connects to the MQTT broker and the gateway push channel, then logs every
//! sensor event, diagnostic and status change until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! telemetry-monitor [OPTIONS]
//!
//! Options:
//!   --config           <FILE>     TOML config file [default: telemetry-client.toml]
//!   --broker-host      <HOST>     Overrides broker.host
//!   --broker-port      <PORT>     Overrides broker.port
//!   --broker-transport <tcp|ws>   Overrides broker.transport
//!   --push-url         <URL>      Overrides push.url
//!   --connect-timeout  <SECS>     Overrides connect_timeout_secs
//!   --command          <JSON>     Sends one command once connected
//!   --query-status                Asks the gateway for hardware status once connected
//! ```
//!
//! A missing config file means defaults.  Log verbosity follows `RUST_LOG`.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use telemetry_client::domain::{BrokerWire, ClientConfig, ClientError, ClientEvent, SourceTag};
use telemetry_client::infrastructure::build_client;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WireArg {
    Tcp,
    Ws,
}

impl From<WireArg> for BrokerWire {
    fn from(arg: WireArg) -> Self {
        match arg {
            WireArg::Tcp => BrokerWire::Tcp,
            WireArg::Ws => BrokerWire::Ws,
        }
    }
}

/// Sensor telemetry monitor over MQTT and the gateway push channel.
#[derive(Debug, Parser)]
#[command(
    name = "telemetry-monitor",
    about = "Sensor telemetry monitor over MQTT and the gateway push channel",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, default_value = "telemetry-client.toml", env = "TELEMETRY_CLIENT_CONFIG")]
    config: PathBuf,

    #[arg(long)]
    broker_host: Option<String>,

    #[arg(long)]
    broker_port: Option<u16>,

    #[arg(long, value_enum)]
    broker_transport: Option<WireArg>,

    /// Gateway push channel, e.g. ws://127.0.0.1:3001.
    #[arg(long)]
    push_url: Option<String>,

    /// Seconds to wait for both transports before reporting a timeout.
    #[arg(long)]
    connect_timeout: Option<u64>,

    /// JSON command to send to the device once connected.
    #[arg(long)]
    command: Option<String>,

    /// Ask the gateway for the hardware status once connected.
    #[arg(long)]
    query_status: bool,
}

impl Cli {
    /// Applies the command-line overrides on top of `config`.
    fn apply_overrides(&self, mut config: ClientConfig) -> ClientConfig {
        if let Some(host) = &self.broker_host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.broker_port {
            config.broker.port = port;
        }
        if let Some(wire) = self.broker_transport {
            config.broker.transport = wire.into();
        }
        if let Some(url) = &self.push_url {
            config.push.url = url.clone();
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout_secs = secs;
        }
        config
    }

    /// # Errors
    ///
    /// Returns an error if `--command` is not valid JSON.
    fn command_payload(&self) -> anyhow::Result<Option<Value>> {
        self.command
            .as_deref()
            .map(|text| serde_json::from_str(text).with_context(|| format!("--command is not JSON: {text}")))
            .transpose()
    }
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Sensor(sensor) => info!(
            "[{}] {} param={} value={:?}",
            sensor.source,
            sensor.device_id.as_deref().unwrap_or("-"),
            sensor.param_id,
            sensor.value
        ),
        ClientEvent::Diagnostic { kind, message } => warn!("gateway {kind:?}: {message}"),
        ClientEvent::HardwareStatus { connected } => info!("hardware connected: {connected}"),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let config = cli.apply_overrides(config);
    let command = cli.command_payload()?;

    info!(
        "telemetry monitor starting: broker={}:{} push={}",
        config.broker.host, config.broker.port, config.push.url
    );

    let client = build_client(&config).context("invalid client configuration")?;
    let _subscriptions: Vec<_> = [SourceTag::Broker, SourceTag::Push, SourceTag::Error]
        .into_iter()
        .map(|tag| client.subscribe(tag, log_event))
        .collect();
    let _status = client.subscribe_status(|status| info!("transport status: {status:?}"));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    tokio::select! {
        _ = cancel.cancelled() => {}
        result = client.connect() => match result {
            Ok(()) => {
                if let Some(payload) = command {
                    match client.send_command(payload).await {
                        Ok(verdict) => info!("command: {}", verdict.message()),
                        Err(e) => warn!("command not delivered: {e}"),
                    }
                }
                if cli.query_status {
                    match client.request_hardware_status().await {
                        Ok(report) => info!("gateway reports serial={} at {}", report.serial, report.server_time),
                        Err(e) => warn!("status query failed: {e}"),
                    }
                }
            }
            Err(ClientError::ConnectTimeout(limit)) => {
                warn!("not fully connected after {limit:?}; still retrying");
            }
            Err(e) => return Err(e.into()),
        },
    }

    cancel.cancelled().await;
    client.disconnect().await;
    info!("telemetry monitor stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
