//! Transport module - TCP sockets with byte-exact framing.
//!
//! Provides:
//! - [`Connection`] - socket state, framed send/receive, peer bookkeeping
//! - [`ListenerTransport`] - bind, listen, accept, many peers
//! - [`ConnectorTransport`] - one outbound connection

mod connection;
mod connector;
mod listener;

pub use connection::{Connection, Endpoint, FramePayload, Received};
pub use connector::{ConnectorTransport, PollOutcome};
pub use listener::ListenerTransport;
