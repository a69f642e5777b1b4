//! # telemetry-core
//!
//! Shared library for the sensor telemetry pipeline.  Both the device-side
//! gateway and the consumer-side transport client depend on it.
//!
//! It has no sockets, no serial ports and no runtime of its own.  Everything
//! here can be exercised from a plain `#[test]`.
//!
//! # Architecture overview
//!
//! ```text
//! Device ──serial──> Gateway ──push channel──> Transport Client ──> callbacks
//!                       │                             ▲
//!                       └──────── (broker) ───────────┘
//! ```
//!
//! - **`domain`** – The vocabulary of the pipeline: transports and their
//!   [`Connection`] state machine, the [`AggregatedStatus`] readiness record,
//!   and the [`SensorReading`] schema a device frame must match.
//!
//! - **`protocol`** – How bytes travel.  The serial link is newline-delimited
//!   JSON, split by [`LineFramer`].  The push channel carries one
//!   `{"event": ..., "data": ...}` envelope per WebSocket text frame
//!   ([`HubEvent`] / [`ClientRequest`]).
//!
//! - **`registry`** – The [`SubscriberRegistry`]: tag-keyed callback sets used
//!   by the hub and the client to fan events out without knowing who listens.

pub mod domain;
pub mod protocol;
pub mod registry;

pub use domain::connection::{Connection, ConnectionState, LinkEvent, TransportTag};
pub use domain::reading::{ParamId, ReadingError, SensorReading, SensorValue};
pub use domain::status::{AggregatedStatus, StatusBoard};
pub use protocol::frame::{encode_frame, FrameError, LineFramer, DEFAULT_MAX_FRAME_LEN};
pub use protocol::messages::{ClientRequest, CommandOutcome, CommandRequest, HubEvent, Notice, StatusReport};
pub use registry::{SubscriberRegistry, Subscription};
