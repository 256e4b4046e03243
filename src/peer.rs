//! Connection identifiers.

use std::fmt;

/// Identifier of one descriptor owned by a transport.
///
/// Ids are handed out from a per-transport counter and never reused while
/// the transport lives, so a stale id can't address a newer connection
/// that happens to get the same OS descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl PeerId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<PeerId> for u64 {
    fn from(id: PeerId) -> Self {
        id.0
    }
}
