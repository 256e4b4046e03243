//! Frame building.
//!
//! A frame is one header followed immediately by its payload; a
//! connection carries a plain sequence of frames.
//!
//! # Example
//!
//! ```
//! use socwire::protocol::{encode_frame, Header, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE};
//!
//! let bytes = encode_frame(b"hello", DEFAULT_MAX_FRAME_SIZE).unwrap();
//! assert_eq!(bytes.len(), HEADER_SIZE + 5);
//! assert_eq!(Header::decode(&bytes).unwrap().payload_size, 5);
//! ```

use super::wire_format::{Header, HEADER_SIZE};
use crate::error::Result;

/// Build a complete frame as a single byte vector.
///
/// The header's size field is written as given; use [`encode_frame`] to
/// derive it from the payload.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a payload into its wire representation.
///
/// Fails with `FrameTooLarge` when the payload exceeds `max_frame_size`.
pub fn encode_frame(payload: &[u8], max_frame_size: u32) -> Result<Vec<u8>> {
    let header = Header::for_payload(payload, max_frame_size)?;
    Ok(build_frame(&header, payload))
}
