//! JSON messages for the push channel between the gateway hub and clients.
//!
//! Every WebSocket text frame carries exactly one envelope:
//!
//! ```json
//! {"event":"sensorData","data":{"paramId":1,"value":85}}
//! {"event":"serialStatus","data":{"connected":true}}
//! {"event":"command","data":{"id":7,"payload":{"relay":1}}}
//! {"event":"getStatus"}
//! ```
//!
//! Serde's adjacent tagging (`tag = "event", content = "data"`) produces this
//! shape.  Two enums are used, one per direction, so the hub can never be
//! asked to send a client-only message and vice versa.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::reading::SensorReading;

// ── Hub → Client ──────────────────────────────────────────────────────────────

/// Everything the hub pushes to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum HubEvent {
    /// Hardware link status, sent on connect and on every serial transition.
    SerialStatus { connected: bool },

    /// One decoded telemetry sample.
    SensorData(SensorReading),

    /// The serial link failed to open, closed, or reported an error.
    SerialError(Notice),

    /// A frame from the device could not be decoded.
    DataError(Notice),

    /// The client's command was written to the device.  Sent to the issuer only.
    CommandSuccess(CommandOutcome),

    /// The client's command was not written.  Sent to the issuer only.
    CommandError(CommandOutcome),

    /// Reply to [`ClientRequest::GetStatus`].
    Status(StatusReport),
}

impl HubEvent {
    /// The wire name of the event, for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::SerialStatus { .. } => "serialStatus",
            HubEvent::SensorData(_) => "sensorData",
            HubEvent::SerialError(_) => "serialError",
            HubEvent::DataError(_) => "dataError",
            HubEvent::CommandSuccess(_) => "commandSuccess",
            HubEvent::CommandError(_) => "commandError",
            HubEvent::Status(_) => "status",
        }
    }
}

/// A human-readable, non-fatal diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub message: String,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of a single command, echoing the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub message: String,
}

/// Reply to an on-demand status poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Whether the hardware link is connected.
    pub serial: bool,
    /// Gateway wall-clock time, RFC 3339 UTC with millisecond precision.
    pub server_time: String,
}

// ── Client → Hub ──────────────────────────────────────────────────────────────

/// Everything a client may send to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientRequest {
    /// Forward `payload` to the device as one frame.
    Command(CommandRequest),
    /// Ask for a [`StatusReport`].
    GetStatus,
}

/// An opaque command payload plus the caller's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub payload: Value,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
