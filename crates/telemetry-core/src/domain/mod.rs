//! Domain types shared by the gateway and the client.
//!
//! Nothing in here performs I/O.  The state machine in [`connection`] only
//! records what the infrastructure layer tells it happened; it never opens a
//! port or a socket itself.

pub mod connection;
pub mod reading;
pub mod status;

pub use connection::{Connection, ConnectionState, LinkEvent, TransportTag};
pub use reading::{ParamId, ReadingError, SensorReading, SensorValue};
pub use status::{AggregatedStatus, StatusBoard};
