//! Application layer: frame and envelope translation without I/O.

pub mod frame_service;

pub use frame_service::{
    command_reply, decode_frame, encode_command, route_event, status_reply, HubTopic,
};
