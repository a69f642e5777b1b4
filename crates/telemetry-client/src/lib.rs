//! telemetry-client library crate.
//!
//! Receives sensor telemetry over two independent transports, an MQTT broker
//! subscription and the gateway's WebSocket push channel, and fans it out to
//! callbacks registered per source.
//!
//! # Architecture
//!
//! ```text
//! MQTT broker (sensors/#)          Gateway hub (push channel)
//!         ↓                                  ↕
//! [telemetry-client]
//!   ├── domain/           ClientConfig, SourceTag, ClientEvent, ClientError
//!   ├── application/      TransportClient, dispatcher, inbound parsing
//!   └── infrastructure/
//!         ├── broker/      rumqttc event loop
//!         └── push/        tokio-tungstenite reconnect loop
//!         ↓
//! Subscribers (callbacks or bounded channels) and status listeners
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let client = telemetry_client::infrastructure::build_client(&ClientConfig::default())?;
//! let _sub = client.subscribe(SourceTag::Push, |event| println!("{event:?}"));
//! client.connect().await?;
//! let verdict = client.send_command(serde_json::json!({"relay": 1})).await?;
//! client.disconnect().await;
//! ```

/// Domain layer: configuration and client events.
pub mod domain;

/// Application layer: the transport client and its dispatcher.
pub mod application;

/// Infrastructure layer: broker and push-channel transports.
pub mod infrastructure;

pub use application::TransportClient;
pub use domain::{ClientConfig, ClientError, ClientEvent, CommandResult, SourceTag};
