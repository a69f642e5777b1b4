//! telemetry-gateway library crate.
//!
//! Reads newline-delimited JSON telemetry from one serial device and
//! redistributes it to any number of WebSocket clients.
//!
//! # Architecture
//!
//! ```text
//! Device (serial, JSON lines)
//!         ↕
//! [telemetry-gateway]
//!   ├── domain/           GatewayConfig, GatewayEvent, CommandError
//!   ├── application/      frame ↔ event ↔ envelope translation
//!   └── infrastructure/
//!         ├── serial_link/ serial actor, reconnect timer
//!         ├── hub/         per-session fan-out
//!         └── ws_server/   WebSocket accept loop and sessions
//!         ↕
//! Push-channel clients (JSON envelopes over WebSocket)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `telemetry-core` only.
//! - `infrastructure` depends on everything else plus tokio, tungstenite and
//!   tokio-serial.

/// Domain layer: configuration and gateway events.
pub mod domain;

/// Application layer: frame and envelope translation.
pub mod application;

/// Infrastructure layer: serial actor, hub and WebSocket server.
pub mod infrastructure;
