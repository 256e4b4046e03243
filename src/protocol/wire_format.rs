//! Wire format encoding and decoding.
//!
//! Implements the 7-byte header format:
//! ```text
//! ┌──────────┬──────────────┐
//! │ Magic    │ Payload size │
//! │ 3 bytes  │ 4 bytes      │
//! │ "SOC"    │ int32 native │
//! └──────────┴──────────────┘
//! ```
//!
//! The size field uses host byte order, so both ends of a connection are
//! expected to share endianness.

use crate::error::{Result, SocwireError};

/// Header size in bytes (fixed, exactly 7).
pub const HEADER_SIZE: usize = 7;

/// Magic prefix carried by every frame.
pub const MAGIC: [u8; 3] = *b"SOC";

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Absolute maximum payload size (max i32).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = i32::MAX as u32;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic bytes as read from the wire.
    pub magic: [u8; 3],
    /// Payload length in bytes, as signed on the wire.
    pub payload_size: i32,
}

impl Header {
    /// Create a header with the protocol magic.
    pub fn new(payload_size: i32) -> Self {
        Self {
            magic: MAGIC,
            payload_size,
        }
    }

    /// Create a header for a payload, checking it against `max_frame_size`.
    ///
    /// # Example
    ///
    /// ```
    /// use socwire::protocol::{Header, DEFAULT_MAX_FRAME_SIZE};
    ///
    /// let header = Header::for_payload(b"hello", DEFAULT_MAX_FRAME_SIZE).unwrap();
    /// assert_eq!(header.payload_size, 5);
    /// ```
    pub fn for_payload(payload: &[u8], max_frame_size: u32) -> Result<Self> {
        let max = max_frame_size.min(ABSOLUTE_MAX_FRAME_SIZE);
        if payload.len() as u64 > u64::from(max) {
            return Err(SocwireError::FrameTooLarge {
                size: payload.len() as u64,
                max,
            });
        }
        Ok(Self::new(payload.len() as i32))
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use socwire::protocol::Header;
    ///
    /// let bytes = Header::new(100).encode();
    /// assert_eq!(bytes.len(), 7);
    /// assert_eq!(&bytes[..3], b"SOC");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (7 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..3].copy_from_slice(&self.magic);
        buf[3..7].copy_from_slice(&self.payload_size.to_ne_bytes());
    }

    /// Decode header from bytes.
    ///
    /// This is a fixed-width parse; it does not check the magic.
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: [buf[0], buf[1], buf[2]],
            payload_size: i32::from_ne_bytes([buf[3], buf[4], buf[5], buf[6]]),
        })
    }

    /// Validate the header and return the payload length.
    ///
    /// Checks:
    /// - Magic equals `"SOC"`
    /// - Payload size is not negative
    /// - Payload size doesn't exceed max
    pub fn validate(&self, max_frame_size: u32) -> Result<usize> {
        if self.magic != MAGIC {
            return Err(SocwireError::Protocol(format!(
                "Invalid magic {:02x?}",
                self.magic
            )));
        }

        if self.payload_size < 0 {
            return Err(SocwireError::Protocol(format!(
                "Negative payload size {}",
                self.payload_size
            )));
        }

        let size = self.payload_size as u32;
        if size > max_frame_size {
            return Err(SocwireError::FrameTooLarge {
                size: u64::from(size),
                max: max_frame_size,
            });
        }

        Ok(size as usize)
    }

    /// Check whether the magic matches the protocol constant.
    #[inline]
    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }
}

/// Decode a header from bytes and validate it (standalone function).
///
/// Returns `Protocol` for short input or a magic mismatch, regardless
/// of the size field.
pub fn decode_header(buf: &[u8], max_frame_size: u32) -> Result<Header> {
    let header = Header::decode(buf).ok_or_else(|| {
        SocwireError::Protocol(format!("Header needs {} bytes, got {}", HEADER_SIZE, buf.len()))
    })?;
    header.validate(max_frame_size)?;
    Ok(header)
}
