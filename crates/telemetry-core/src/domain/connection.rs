//! Per-transport connection state machine.
//!
//! A [`Connection`] never changes state on its own.  The code that owns the
//! underlying port or socket reports what happened as a [`LinkEvent`] and the
//! connection moves to the matching [`ConnectionState`]:
//!
//! ```text
//!                  OpenStarted
//!   Disconnected ───────────────> Connecting
//!        ▲                         │      │
//!        │ Closed     OpenSucceeded│      │OpenFailed
//!        │                         ▼      ▼
//!        └──────────────────── Connected  Errored
//!                                  │        ▲
//!                                  └────────┘
//!                                  WriteFailed
//! ```
//!
//! `Closed` is accepted from every state, and `OpenStarted` from every state
//! except `Connected`, so a retry after `Errored` goes through `Connecting`
//! again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one of the three independently-connecting transports.
///
/// Serialized in lowercase (`"serial"`, `"broker"`, `"push"`), which is also
/// the key used in the aggregated status object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportTag {
    /// The hardware link owned by the gateway.
    Serial,
    /// The publish/subscribe broker subscription.
    Broker,
    /// The direct push channel to the gateway hub.
    Push,
}

impl TransportTag {
    /// Returns the lowercase wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportTag::Serial => "serial",
            TransportTag::Broker => "broker",
            TransportTag::Push => "push",
        }
    }
}

impl fmt::Display for TransportTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four states a [`Connection`] can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link, and no open attempt in progress.
    Disconnected,
    /// An open attempt is in progress.
    Connecting,
    /// The link is open and usable.
    Connected,
    /// The last open or write attempt failed.
    Errored,
}

/// Something that happened to a transport, as reported by its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// An open/connect attempt has begun.
    OpenStarted,
    /// The open/connect attempt succeeded.
    OpenSucceeded,
    /// The open/connect attempt failed with the given reason.
    OpenFailed(String),
    /// An open link was closed (by the peer, by an I/O error, or locally).
    Closed,
    /// A write on an open link failed.
    WriteFailed(String),
}

/// State of one transport plus the reason for its last failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    tag: TransportTag,
    state: ConnectionState,
    last_error: Option<String>,
}

impl Connection {
    /// Creates a connection in the `Disconnected` state.
    pub fn new(tag: TransportTag) -> Self {
        Self {
            tag,
            state: ConnectionState::Disconnected,
            last_error: None,
        }
    }

    /// Which transport this connection describes.
    pub fn tag(&self) -> TransportTag {
        self.tag
    }

    /// The current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `true` only in the `Connected` state.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The reason for the most recent `OpenFailed` / `WriteFailed`, cleared
    /// on the next successful open.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Applies `event` and returns `true` if the state changed.
    ///
    /// Events that make no sense in the current state (e.g. `OpenSucceeded`
    /// while already connected, `WriteFailed` while not connected) are
    /// ignored and return `false`.
    pub fn apply(&mut self, event: LinkEvent) -> bool {
        use ConnectionState::*;

        let next = match (&event, self.state) {
            (LinkEvent::OpenStarted, Connected) => return false,
            (LinkEvent::OpenStarted, _) => Connecting,
            (LinkEvent::OpenSucceeded, Connected) => return false,
            (LinkEvent::OpenSucceeded, _) => Connected,
            (LinkEvent::OpenFailed(_), Connected) => return false,
            (LinkEvent::OpenFailed(_), _) => Errored,
            (LinkEvent::Closed, _) => Disconnected,
            (LinkEvent::WriteFailed(_), Connected) => Errored,
            (LinkEvent::WriteFailed(_), _) => return false,
        };

        match event {
            LinkEvent::OpenFailed(reason) | LinkEvent::WriteFailed(reason) => {
                self.last_error = Some(reason);
            }
            LinkEvent::OpenSucceeded => self.last_error = None,
            _ => {}
        }

        let changed = next != self.state;
        self.state = next;
        changed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_is_disconnected_without_error() {
        let conn = Connection::new(TransportTag::Serial);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.last_error().is_none());
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_open_started_then_succeeded_reaches_connected() {
        // Arrange
        let mut conn = Connection::new(TransportTag::Push);

        // Act
        let a = conn.apply(LinkEvent::OpenStarted);
        let b = conn.apply(LinkEvent::OpenSucceeded);

        // Assert
        assert!(a && b);
        assert!(conn.is_connected());
    }

    #[test]
    fn test_open_failed_records_reason_and_errors() {
        let mut conn = Connection::new(TransportTag::Serial);
        conn.apply(LinkEvent::OpenStarted);

        assert!(conn.apply(LinkEvent::OpenFailed("no such device".into())));

        assert_eq!(conn.state(), ConnectionState::Errored);
        assert_eq!(conn.last_error(), Some("no such device"));
    }

    #[test]
    fn test_successful_open_clears_last_error() {
        let mut conn = Connection::new(TransportTag::Serial);
        conn.apply(LinkEvent::OpenFailed("busy".into()));
        conn.apply(LinkEvent::OpenStarted);
        conn.apply(LinkEvent::OpenSucceeded);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_closed_from_connected_returns_to_disconnected() {
        let mut conn = Connection::new(TransportTag::Broker);
        conn.apply(LinkEvent::OpenSucceeded);

        assert!(conn.apply(LinkEvent::Closed));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_second_close_reports_no_change() {
        // A transport may report the same close twice (error + close callbacks).
        let mut conn = Connection::new(TransportTag::Serial);
        conn.apply(LinkEvent::OpenSucceeded);
        assert!(conn.apply(LinkEvent::Closed));
        assert!(!conn.apply(LinkEvent::Closed));
    }

    #[test]
    fn test_write_failed_only_applies_when_connected() {
        let mut conn = Connection::new(TransportTag::Push);
        assert!(!conn.apply(LinkEvent::WriteFailed("broken pipe".into())));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.apply(LinkEvent::OpenSucceeded);
        assert!(conn.apply(LinkEvent::WriteFailed("broken pipe".into())));
        assert_eq!(conn.state(), ConnectionState::Errored);
        assert_eq!(conn.last_error(), Some("broken pipe"));
    }

    #[test]
    fn test_open_started_is_ignored_while_connected() {
        let mut conn = Connection::new(TransportTag::Push);
        conn.apply(LinkEvent::OpenSucceeded);
        assert!(!conn.apply(LinkEvent::OpenStarted));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_transport_tag_wire_names() {
        assert_eq!(TransportTag::Serial.to_string(), "serial");
        assert_eq!(serde_json::to_string(&TransportTag::Broker).unwrap(), "\"broker\"");
        assert_eq!(TransportTag::Push.as_str(), "push");
    }
}
