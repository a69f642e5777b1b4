//! Infrastructure layer for telemetry-gateway.
//!
//! Owns all I/O: the serial port, the WebSocket listener and the tasks that
//! connect them.
//!
//! # Responsibilities
//!
//! - Opening, reading and writing the serial device ([`serial_link`])
//! - Fanning gateway events out to sessions ([`hub`])
//! - Accepting and serving push-channel sessions ([`ws_server`])
//! - Wiring the three together and shutting them down ([`serve`])

pub mod hub;
pub mod serial_link;
pub mod ws_server;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::config::GatewayConfig;
use crate::domain::events::GatewayEvent;

pub use hub::{BroadcastHub, HubSession};
pub use serial_link::{DeviceOpener, DeviceStream, GatewayHandle, ReconnectTimer, SerialGateway, SerialOpener};
pub use ws_server::{bind, run_server};

/// Queue depth between the serial actor and the hub pump.
const EVENT_QUEUE: usize = 1024;

/// Binds `config.bind_addr` and runs the gateway until `cancel` fires.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_gateway(
    config: GatewayConfig,
    opener: Arc<dyn DeviceOpener>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind(config.bind_addr).await?;
    serve(listener, config, opener, cancel).await
}

/// Runs the serial actor, the hub pump and the accept loop on an already
/// bound listener until `cancel` fires.
///
/// # Errors
///
/// Propagates an error from the accept loop.
pub async fn serve(
    listener: TcpListener,
    config: GatewayConfig,
    opener: Arc<dyn DeviceOpener>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (event_tx, event_rx) = mpsc::channel::<GatewayEvent>(EVENT_QUEUE);

    let (gateway, handle) = SerialGateway::new(opener, config.serial.clone(), event_tx, cancel.clone());
    let actor = tokio::spawn(gateway.run());

    let hub = Arc::new(BroadcastHub::new(handle, config.session_buffer));
    let pump = tokio::spawn({
        let hub = Arc::clone(&hub);
        let cancel = cancel.clone();
        async move { hub.run_pump(event_rx, cancel).await }
    });

    let result = run_server(listener, hub, Arc::new(config), cancel.clone()).await;

    cancel.cancel();
    if actor.await.is_err() {
        debug!("serial actor ended abnormally");
    }
    if pump.await.is_err() {
        debug!("hub pump ended abnormally");
    }
    info!("gateway stopped");
    result
}
