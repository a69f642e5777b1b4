//! What the serial side reports to the hub, and how commands can fail.
//!
//! The user-facing texts here are sent verbatim to push-channel clients, which
//! show them as-is.  Changing one is a wire change.

use telemetry_core::SensorReading;
use thiserror::Error;

pub const MSG_OPEN_FAILED: &str = "Failed to connect to hardware";
pub const MSG_CONNECTION_LOST: &str = "Serial port connection lost";
pub const MSG_PORT_ERROR: &str = "Serial port error occurred";
pub const MSG_PARSE_FAILED: &str = "Failed to parse sensor data";
pub const MSG_COMMAND_SENT: &str = "Command sent successfully";
pub const MSG_NOT_CONNECTED: &str = "Hardware not connected";
pub const MSG_WRITE_FAILED: &str = "Failed to send command";
pub const MSG_COMMAND_INVALID: &str = "Failed to process command";

/// A serial-link failure as reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    /// The device could not be opened.
    OpenFailed,
    /// The device went away (EOF on read).
    ConnectionLost,
    /// A read returned an I/O error.
    PortError,
}

impl LinkFault {
    pub fn message(self) -> &'static str {
        match self {
            LinkFault::OpenFailed => MSG_OPEN_FAILED,
            LinkFault::ConnectionLost => MSG_CONNECTION_LOST,
            LinkFault::PortError => MSG_PORT_ERROR,
        }
    }
}

/// Everything the serial actor hands to the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A frame that decoded into a reading.
    Reading(SensorReading),
    /// A frame that did not; `reason` is for logs only.
    ParseFailure { reason: String },
    /// The serial link failed.  `detail` is for logs only.
    LinkError { fault: LinkFault, detail: String },
    /// The link's connected flag flipped.
    LinkStatus { connected: bool },
}

/// Why a command did not reach the device.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The serial link is not connected; nothing was written.
    #[error("serial link is not connected")]
    NotConnected,

    /// The payload could not be serialized into a frame.
    #[error("command payload could not be encoded: {0}")]
    Unencodable(String),

    /// The write to the device failed.
    #[error("serial write failed: {0}")]
    WriteFailed(String),

    /// The serial actor has stopped.
    #[error("gateway is shutting down")]
    Closed,
}

impl CommandError {
    /// Text sent to the issuing client in `commandError`.
    pub fn message(&self) -> &'static str {
        match self {
            CommandError::NotConnected => MSG_NOT_CONNECTED,
            CommandError::Unencodable(_) => MSG_COMMAND_INVALID,
            CommandError::WriteFailed(_) | CommandError::Closed => MSG_WRITE_FAILED,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
