//! Domain layer for telemetry-client: configuration and the event vocabulary.
//! No I/O.

pub mod config;
pub mod events;

pub use config::{BrokerConfig, BrokerWire, ClientConfig, ConfigError, PushConfig};
pub use events::{ClientError, ClientEvent, CommandResult, DiagnosticKind, SensorEvent, SourceTag};
