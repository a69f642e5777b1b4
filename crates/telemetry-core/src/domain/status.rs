//! Aggregated readiness across several independently-failing transports.
//!
//! [`StatusBoard`] owns one [`Connection`] per tracked transport.  Every
//! state change produces a fresh [`AggregatedStatus`] snapshot that the caller
//! broadcasts to its status listeners.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::connection::{Connection, ConnectionState, LinkEvent, TransportTag};

/// `{<transportTag>: bool, ...}`, where `true` means that transport is Connected.
///
/// Keys are ordered, so two snapshots of the same states compare and
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregatedStatus(BTreeMap<TransportTag, bool>);

impl AggregatedStatus {
    /// Builds a status with every tag set to `false`.
    pub fn all_down(tags: &[TransportTag]) -> Self {
        Self(tags.iter().map(|t| (*t, false)).collect())
    }

    /// Whether `tag` is connected.  Untracked tags read as `false`.
    pub fn is_connected(&self, tag: TransportTag) -> bool {
        self.0.get(&tag).copied().unwrap_or(false)
    }

    /// `true` when every tracked transport is connected.
    pub fn all_connected(&self) -> bool {
        !self.0.is_empty() && self.0.values().all(|up| *up)
    }

    /// Iterates `(tag, connected)` pairs in tag order.
    pub fn iter(&self) -> impl Iterator<Item = (TransportTag, bool)> + '_ {
        self.0.iter().map(|(t, up)| (*t, *up))
    }
}

/// The set of connections whose state makes up an [`AggregatedStatus`].
#[derive(Debug, Clone)]
pub struct StatusBoard {
    connections: BTreeMap<TransportTag, Connection>,
}

impl StatusBoard {
    /// Tracks the given transports, all starting `Disconnected`.
    pub fn new(tags: &[TransportTag]) -> Self {
        Self {
            connections: tags.iter().map(|t| (*t, Connection::new(*t))).collect(),
        }
    }

    /// Applies `event` to the connection for `tag`.
    ///
    /// Returns the recomputed snapshot when that connection's state changed,
    /// `None` otherwise (including for untracked tags).  Only the `tag` field
    /// can differ from the previous snapshot.
    pub fn apply(&mut self, tag: TransportTag, event: LinkEvent) -> Option<AggregatedStatus> {
        let Some(conn) = self.connections.get_mut(&tag) else {
            debug!("status board ignoring event for untracked transport {tag}");
            return None;
        };
        if conn.apply(event) {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// The current aggregated status.
    pub fn snapshot(&self) -> AggregatedStatus {
        AggregatedStatus(
            self.connections
                .iter()
                .map(|(t, c)| (*t, c.is_connected()))
                .collect(),
        )
    }

    /// The full state of one tracked transport.
    pub fn state(&self, tag: TransportTag) -> Option<ConnectionState> {
        self.connections.get(&tag).map(Connection::state)
    }

    /// The connection record for `tag`, including its last error.
    pub fn connection(&self, tag: TransportTag) -> Option<&Connection> {
        self.connections.get(&tag)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
