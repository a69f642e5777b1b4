//! Protocol module: serial line framing and push-channel messages.

pub mod frame;
pub mod messages;

pub use frame::{encode_frame, FrameError, LineFramer, DEFAULT_MAX_FRAME_LEN, DELIMITER};
pub use messages::*;
