//! Application layer for telemetry-client.
//!
//! - [`inbound`]: broker message validation and push envelope sorting
//! - [`transport`]: the [`Transport`] seam both transports implement
//! - [`client`]: [`TransportClient`], the dispatcher and request correlation

pub mod client;
pub mod inbound;
pub mod transport;

pub use client::TransportClient;
pub use inbound::{classify_push, parse_broker_message, InboundError, PushInbound, SensorTopic};
pub use transport::{Outbound, Transport, TransportLink, TransportSignal};
