//! Protocol module - wire format and framing.
//!
//! This module implements the binary protocol:
//! - 7-byte header encoding/decoding (`"SOC"` magic + payload size)
//! - Frame building for the send path

mod frame;
mod wire_format;

pub use frame::{build_frame, encode_frame};
pub use wire_format::{
    decode_header, Header, ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAGIC,
};
