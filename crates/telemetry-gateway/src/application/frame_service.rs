//! Translation between serial frames, gateway events and push envelopes.
//!
//! Pure functions: no sockets, no ports, no runtime.  The serial actor calls
//! [`decode_frame`] and [`encode_command`]; the hub calls [`route_event`],
//! [`command_reply`] and [`status_reply`].
//!
//! ```text
//! device line ──decode_frame──> GatewayEvent ──route_event──> (HubTopic, HubEvent)
//! client command ──encode_command──> device line
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use telemetry_core::{
    encode_frame, CommandOutcome, FrameError, HubEvent, Notice, SensorReading, StatusReport,
};

use crate::domain::events::{CommandError, GatewayEvent, MSG_COMMAND_SENT, MSG_PARSE_FAILED};

/// The hub's fan-out channels.  Every session listens on all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubTopic {
    /// `sensorData`
    Telemetry,
    /// `serialError`, `dataError`
    Diagnostics,
    /// `serialStatus`
    Status,
}

impl HubTopic {
    pub const ALL: [HubTopic; 3] = [HubTopic::Telemetry, HubTopic::Diagnostics, HubTopic::Status];
}

// ── Device → Hub ──────────────────────────────────────────────────────────────

/// Turns one framer result into the event the hub should see.
///
/// Any frame that is not a valid reading becomes a single `ParseFailure`.
pub fn decode_frame(frame: Result<String, FrameError>) -> GatewayEvent {
    let text = match frame {
        Ok(text) => text,
        Err(e) => {
            return GatewayEvent::ParseFailure {
                reason: e.to_string(),
            }
        }
    };
    match SensorReading::from_json(&text) {
        Ok(reading) => GatewayEvent::Reading(reading),
        Err(e) => GatewayEvent::ParseFailure {
            reason: e.to_string(),
        },
    }
}

/// Maps a gateway event to its fan-out topic and wire envelope.
pub fn route_event(event: GatewayEvent) -> (HubTopic, HubEvent) {
    match event {
        GatewayEvent::Reading(reading) => (HubTopic::Telemetry, HubEvent::SensorData(reading)),
        GatewayEvent::ParseFailure { .. } => (
            HubTopic::Diagnostics,
            HubEvent::DataError(Notice::new(MSG_PARSE_FAILED)),
        ),
        GatewayEvent::LinkError { fault, .. } => (
            HubTopic::Diagnostics,
            HubEvent::SerialError(Notice::new(fault.message())),
        ),
        GatewayEvent::LinkStatus { connected } => {
            (HubTopic::Status, HubEvent::SerialStatus { connected })
        }
    }
}

// ── Client → Device ───────────────────────────────────────────────────────────

/// Serializes a command payload as one delimiter-terminated frame.
///
/// Compact JSON never contains a raw newline, so the payload cannot split
/// into two frames on the device side.
///
/// # Errors
///
/// Returns [`CommandError::Unencodable`] if serialization fails.
pub fn encode_command(payload: &Value) -> Result<Vec<u8>, CommandError> {
    let body =
        serde_json::to_string(payload).map_err(|e| CommandError::Unencodable(e.to_string()))?;
    Ok(encode_frame(&body))
}

// ── Replies to a single session ───────────────────────────────────────────────

/// Builds the `commandSuccess` / `commandError` reply for the issuing session.
pub fn command_reply(id: Option<u64>, result: Result<(), CommandError>) -> HubEvent {
    match result {
        Ok(()) => HubEvent::CommandSuccess(CommandOutcome {
            id,
            message: MSG_COMMAND_SENT.to_string(),
        }),
        Err(e) => HubEvent::CommandError(CommandOutcome {
            id,
            message: e.message().to_string(),
        }),
    }
}

/// Builds the `status` reply to a `getStatus` poll.
pub fn status_reply(serial_connected: bool, now: DateTime<Utc>) -> HubEvent {
    HubEvent::Status(StatusReport {
        serial: serial_connected,
        server_time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
