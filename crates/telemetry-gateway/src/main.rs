//! Telemetry gateway: entry point.
//!
//! Opens the serial device, decodes its JSON lines and pushes them to every
//! connected WebSocket client.  Clients may send commands back to the device.
//!
//! # Usage
//!
//! ```text
//! telemetry-gateway [OPTIONS]
//!
//! Options:
//!   --serial-path     <PATH>   Serial device [default: COM3 / /dev/ttyUSB0]
//!   --baud-rate       <BAUD>   Serial baud rate [default: 115200]
//!   --bind            <IP>     Listener address [default: 0.0.0.0]
//!   --port            <PORT>   Listener port [default: 3001]
//!   --reconnect-delay <SECS>   Serial retry delay [default: 5]
//!   --max-frame-len   <BYTES>  Longest accepted line [default: 65536]
//!   --ping-interval   <SECS>   Session ping interval [default: 10]
//!   --ping-timeout    <SECS>   Extra grace before dropping [default: 5]
//! ```
//!
//! Every option can also be set with the matching `TELEMETRY_*` environment
//! variable (`TELEMETRY_SERIAL_PATH`, `TELEMETRY_PORT`, ...).  CLI arguments
//! take precedence.  Log verbosity follows `RUST_LOG`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use telemetry_core::DEFAULT_MAX_FRAME_LEN;
use telemetry_gateway::domain::{GatewayConfig, SerialSettings, DEFAULT_SERIAL_PATH};
use telemetry_gateway::infrastructure::{run_gateway, SerialOpener};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial sensor gateway with a WebSocket push channel.
#[derive(Debug, Parser)]
#[command(
    name = "telemetry-gateway",
    about = "Serial sensor gateway with a WebSocket push channel",
    version
)]
struct Cli {
    /// Serial device to open.
    #[arg(long, default_value = DEFAULT_SERIAL_PATH, env = "TELEMETRY_SERIAL_PATH")]
    serial_path: String,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200, env = "TELEMETRY_BAUD_RATE")]
    baud_rate: u32,

    /// IP address to bind the WebSocket listener to.
    #[arg(long, default_value = "0.0.0.0", env = "TELEMETRY_BIND")]
    bind: String,

    /// TCP port for the WebSocket listener.
    #[arg(long, default_value_t = 3001, env = "TELEMETRY_PORT")]
    port: u16,

    /// Seconds between a serial failure and the next open attempt.
    #[arg(
        long,
        default_value_t = 5,
        env = "TELEMETRY_RECONNECT_DELAY",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    reconnect_delay: u64,

    /// Longest accepted serial line in bytes; longer lines are dropped.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN, env = "TELEMETRY_MAX_FRAME_LEN")]
    max_frame_len: usize,

    /// Seconds between keepalive pings to each session.
    #[arg(
        long,
        default_value_t = 10,
        env = "TELEMETRY_PING_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    ping_interval: u64,

    /// Extra seconds of silence tolerated after a ping before the session
    /// is dropped.
    #[arg(long, default_value_t = 5, env = "TELEMETRY_PING_TIMEOUT")]
    ping_timeout: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        Ok(GatewayConfig {
            serial: SerialSettings {
                path: self.serial_path,
                baud_rate: self.baud_rate,
                reconnect_delay: Duration::from_secs(self.reconnect_delay),
                max_frame_len: self.max_frame_len,
            },
            bind_addr,
            ping_interval: Duration::from_secs(self.ping_interval),
            ping_timeout: Duration::from_secs(self.ping_timeout),
            ..GatewayConfig::default()
        })
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

    let config = Cli::parse().into_gateway_config()?;

    info!(
        "telemetry gateway starting: serial={} @ {} baud, listen={}",
        config.serial.path, config.serial.baud_rate, config.bind_addr
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_gateway(config, Arc::new(SerialOpener), cancel).await?;

    info!("telemetry gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
