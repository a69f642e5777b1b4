//! Infrastructure layer for telemetry-client.
//!
//! - [`broker`]: MQTT subscription via rumqttc
//! - [`push`]: WebSocket client to the gateway hub
//!
//! [`build_client`] wires both into a [`TransportClient`].

pub mod broker;
pub mod push;

use crate::application::client::TransportClient;
use crate::application::transport::Transport;
use crate::domain::config::{ClientConfig, ConfigError};

pub use broker::MqttTransport;
pub use push::{PushError, PushTransport};

/// Builds a client over the real broker and push transports.
///
/// # Errors
///
/// Returns [`ConfigError`] if the push channel URL is invalid.
pub fn build_client(config: &ClientConfig) -> Result<TransportClient, ConfigError> {
    let endpoint = config.push.endpoint()?;
    let transports: Vec<Box<dyn Transport>> = vec![
        Box::new(MqttTransport::new(config.broker.clone())),
        Box::new(PushTransport::new(endpoint, &config.push)),
    ];
    Ok(TransportClient::new(transports, config))
}
