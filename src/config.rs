//! Static transport configuration.
//!
//! Every [`Server`](crate::Server) and [`Client`](crate::Client) is built
//! from a [`TransportConfig`]. The configuration is read once when the
//! background task starts; it cannot be changed while running.
//!
//! # Example
//!
//! ```
//! use socwire::{Backend, TransportConfig};
//!
//! let config = TransportConfig::default()
//!     .with_port(7000)
//!     .with_backend(Backend::DescriptorSet);
//! assert_eq!(config.socket_addr().port(), 7000);
//!
//! let parsed = TransportConfig::from_json_str(r#"{ "port": 7001 }"#).unwrap();
//! assert_eq!(parsed.address.to_string(), "127.0.0.1");
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mux::Backend;
use crate::protocol::{ABSOLUTE_MAX_FRAME_SIZE, DEFAULT_MAX_FRAME_SIZE};

/// Default listen/connect address.
pub const DEFAULT_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 9876;

/// Default upper bound of one multiplexer wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default back-off for would-block I/O and reconnect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default limit on how long a half-transferred frame may stall.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Default listen queue length. The OS rounds it up to its minimum.
pub const DEFAULT_BACKLOG: i32 = 0;

/// Configuration shared by the server and client wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address to bind (server) or connect to (client).
    pub address: IpAddr,
    /// Port to bind or connect to. `0` lets the server pick one.
    pub port: u16,
    /// Readiness notification backend.
    pub backend: Backend,
    /// Upper bound of one multiplexer wait, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Sleep between retries, in milliseconds.
    pub retry_interval_ms: u64,
    /// Longest a frame read or write may go without progress, in
    /// milliseconds, before it fails with `TimedOut`.
    pub io_timeout_ms: u64,
    /// Largest accepted payload in bytes, for both directions.
    pub max_frame_size: u32,
    /// Pending-connection queue length passed to `listen`.
    pub backlog: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            backend: Backend::default(),
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            io_timeout_ms: DEFAULT_IO_TIMEOUT.as_millis() as u64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl TransportConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Set the address.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the readiness backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the multiplexer wait bound.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the stall limit for frame reads and writes.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the maximum frame size.
    ///
    /// Values above `i32::MAX` are clamped, since the wire carries a
    /// signed 32-bit length.
    pub fn with_max_frame_size(mut self, max: u32) -> Self {
        self.max_frame_size = max;
        self.normalized()
    }

    /// Set the listen queue length.
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Socket address built from `address` and `port`.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Multiplexer wait bound as a `Duration`.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Retry interval as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Stall limit as a `Duration`.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    fn normalized(mut self) -> Self {
        self.max_frame_size = self.max_frame_size.min(ABSOLUTE_MAX_FRAME_SIZE);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();

        assert_eq!(config.socket_addr(), "127.0.0.1:9876".parse().unwrap());
        assert_eq!(config.backend, Backend::EventQueue);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_interval(), Duration::from_millis(100));
        assert_eq!(config.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
    }

    #[test]
    fn test_builder_chaining() {
        let config = TransportConfig::new()
            .with_address("10.0.0.1".parse().unwrap())
            .with_port(1234)
            .with_backend(Backend::DescriptorSet)
            .with_poll_timeout(Duration::from_millis(250))
            .with_retry_interval(Duration::from_millis(10))
            .with_io_timeout(Duration::from_millis(750))
            .with_max_frame_size(1024)
            .with_backlog(16);

        assert_eq!(config.socket_addr(), "10.0.0.1:1234".parse().unwrap());
        assert_eq!(config.backend, Backend::DescriptorSet);
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.retry_interval_ms, 10);
        assert_eq!(config.io_timeout_ms, 750);
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.backlog, 16);
    }

    #[test]
    fn test_max_frame_size_clamped() {
        let config = TransportConfig::new().with_max_frame_size(u32::MAX);
        assert_eq!(config.max_frame_size, ABSOLUTE_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_from_json_partial() {
        let config = TransportConfig::from_json_str(
            r#"{ "port": 5555, "backend": "descriptor_set", "max_frame_size": 4294967295 }"#,
        )
        .unwrap();

        assert_eq!(config.port, 5555);
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.backend, Backend::DescriptorSet);
        assert_eq!(config.max_frame_size, ABSOLUTE_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = TransportConfig::from_json_str(r#"{ "port": "nope" }"#).unwrap_err();
        assert!(err.to_string().contains("Config error"));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "address": "0.0.0.0", "poll_timeout_ms": 50 }}"#).unwrap();

        let config = TransportConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.address.to_string(), "0.0.0.0");
        assert_eq!(config.poll_timeout(), Duration::from_millis(50));
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let json = serde_json::to_string(&TransportConfig::default()).unwrap();
        assert_eq!(
            TransportConfig::from_json_str(&json).unwrap(),
            TransportConfig::default()
        );
    }
}
