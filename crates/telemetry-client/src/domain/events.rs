//! What the client hands to its subscribers, and how its calls fail.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use telemetry_core::{ParamId, SensorReading, SensorValue, TransportTag};
use thiserror::Error;

/// Subscriber key.  `Broker` and `Push` carry events from that transport;
/// `Error` carries diagnostics relayed by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Broker,
    Push,
    Error,
}

impl SourceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::Broker => "broker",
            SourceTag::Push => "push",
            SourceTag::Error => "error",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<TransportTag> for SourceTag {
    fn from(tag: TransportTag) -> Self {
        match tag {
            TransportTag::Broker => SourceTag::Broker,
            // The serial link is never seen directly by the client; its
            // status arrives over the push channel.
            TransportTag::Push | TransportTag::Serial => SourceTag::Push,
        }
    }
}

/// One telemetry sample as received by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEvent {
    pub source: TransportTag,
    /// From the broker topic; the push channel does not carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub param_id: ParamId,
    pub value: SensorValue,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub received_at: DateTime<Utc>,
}

impl SensorEvent {
    pub fn from_reading(
        source: TransportTag,
        device_id: Option<String>,
        reading: SensorReading,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            device_id,
            param_id: reading.param_id,
            value: reading.value,
            extra: reading.extra,
            received_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Hardware link trouble reported by the gateway.
    Serial,
    /// A device frame the gateway could not parse.
    Data,
    /// A command rejection nobody was waiting for.
    Command,
}

/// Payload delivered to [`SourceTag`] subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    Sensor(SensorEvent),
    Diagnostic { kind: DiagnosticKind, message: String },
    HardwareStatus { connected: bool },
}

impl ClientEvent {
    /// Which subscriber set this event belongs to.
    pub fn source_tag(&self) -> SourceTag {
        match self {
            ClientEvent::Sensor(event) => event.source.into(),
            ClientEvent::Diagnostic { .. } => SourceTag::Error,
            ClientEvent::HardwareStatus { .. } => SourceTag::Push,
        }
    }
}

/// What the gateway said about one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The frame was written to the device.
    Sent { message: String },
    /// The gateway refused or failed to write it.
    Rejected { message: String },
}

impl CommandResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, CommandResult::Sent { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            CommandResult::Sent { message } | CommandResult::Rejected { message } => message,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    /// Both transports did not reach Connected in time.  They keep retrying.
    #[error("transports not both connected within {0:?}")]
    ConnectTimeout(Duration),

    #[error("{0} transport is not connected")]
    NotConnected(TransportTag),

    #[error("no reply from the gateway within {0:?}")]
    ReplyTimeout(Duration),

    /// `disconnect()` was called.
    #[error("client is disconnected")]
    Closed,

    #[error("payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_events_route_to_expected_tags() {
        let reading = SensorReading::from_json(r#"{"paramId":1,"value":85}"#).unwrap();
        let push = ClientEvent::Sensor(SensorEvent::from_reading(
            TransportTag::Push,
            None,
            reading.clone(),
            Utc::now(),
        ));
        let broker = ClientEvent::Sensor(SensorEvent::from_reading(
            TransportTag::Broker,
            Some("dev1".into()),
            reading,
            Utc::now(),
        ));

        assert_eq!(push.source_tag(), SourceTag::Push);
        assert_eq!(broker.source_tag(), SourceTag::Broker);
        assert_eq!(
            ClientEvent::HardwareStatus { connected: true }.source_tag(),
            SourceTag::Push
        );
        assert_eq!(
            ClientEvent::Diagnostic {
                kind: DiagnosticKind::Data,
                message: "x".into()
            }
            .source_tag(),
            SourceTag::Error
        );
    }

    #[test]
    fn test_sensor_event_serializes_flat() {
        // Arrange
        let reading =
            SensorReading::from_json(r#"{"paramId":"temp","value":21.5,"unit":"C"}"#).unwrap();
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        // Act
        let value = serde_json::to_value(SensorEvent::from_reading(
            TransportTag::Broker,
            Some("dev7".into()),
            reading,
            at,
        ))
        .unwrap();

        // Assert
        assert_eq!(value["source"], json!("broker"));
        assert_eq!(value["deviceId"], json!("dev7"));
        assert_eq!(value["paramId"], json!("temp"));
        assert_eq!(value["unit"], json!("C"));
    }

    #[test]
    fn test_command_result_accessors() {
        let ok = CommandResult::Sent {
            message: "Command sent successfully".into(),
        };
        let no = CommandResult::Rejected {
            message: "Hardware not connected".into(),
        };
        assert!(ok.is_sent());
        assert!(!no.is_sent());
        assert_eq!(no.message(), "Hardware not connected");
    }
}
