//! Error types for socwire.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for all socwire operations.
#[derive(Debug, Error)]
pub enum SocwireError {
    /// Socket or multiplexer handle could not be created.
    #[error("Allocation error: {0}")]
    Allocation(#[source] std::io::Error),

    /// Binding the listening socket failed.
    #[error("Bind to {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Switching the bound socket to listening mode failed.
    #[error("Listen failed: {0}")]
    Listen(#[source] std::io::Error),

    /// Connecting to the remote endpoint failed.
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Target descriptor is not a member of the live peer set.
    #[error("Not connected")]
    NotConnected,

    /// Protocol error (bad magic, negative size, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame payload exceeds the configured maximum.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u64, max: u32 },

    /// Peer closed the connection.
    #[error("Peer closed")]
    PeerClosed,

    /// The owning task was asked to stop while a frame was in flight.
    #[error("Cancelled")]
    Cancelled,

    /// I/O error during socket or multiplexer operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type alias using SocwireError.
pub type Result<T> = std::result::Result<T, SocwireError>;
