//! Domain layer for telemetry-gateway.
//!
//! Pure types with no I/O: the runtime configuration and the events the
//! serial side reports upward.

pub mod config;
pub mod events;

pub use config::{GatewayConfig, SerialSettings, DEFAULT_SERIAL_PATH, MIN_PING_INTERVAL};
pub use events::{CommandError, GatewayEvent, LinkFault};
