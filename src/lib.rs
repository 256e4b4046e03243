//! # socwire
//!
//! Duplex message transport over TCP.
//!
//! A process runs a [`Server`] that accepts many peers, or a [`Client`]
//! that connects to one server, and exchanges discrete length-prefixed
//! messages. Each side runs on its own background thread; the client
//! reconnects on its own when the server goes away.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): 7-byte header, `"SOC"` magic + `i32` payload size
//! - **Connection** ([`transport::Connection`]): whole-frame send/receive over a byte stream
//! - **Multiplexer** ([`mux`]): bounded readiness wait, `mio` or `poll(2)` backend
//! - **Transports**: [`transport::ListenerTransport`] and [`transport::ConnectorTransport`]
//! - **Wrappers**: [`Server`] and [`Client`] own a transport plus its task
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socwire::{receiver, Client, PeerId, Server, TransportConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = TransportConfig::default();
//!
//!     let server = Arc::new(Server::new(config.clone()));
//!     let replies = server.clone();
//!     server
//!         .start(Arc::new(move |peer: PeerId, data: &[u8]| {
//!             let _ = replies.send_data(peer, data);
//!         }))
//!         .unwrap();
//!
//!     let (rx_side, mut messages) = receiver::channel();
//!     let client = Client::new(config);
//!     client.start(Arc::new(rx_side)).unwrap();
//!
//!     while client.send_data(b"echo me").is_err() {
//!         tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!     }
//!     let echoed = messages.recv().await.unwrap();
//!     assert_eq!(&echoed.payload[..], b"echo me");
//!
//!     client.end();
//!     server.end();
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod config;
pub mod error;
pub mod log;
pub mod mux;
pub mod protocol;
pub mod receiver;
pub mod transport;

mod client;
mod peer;
mod server;
mod task;

pub use client::{Client, SERVER_PEER};
pub use config::TransportConfig;
pub use error::{Result, SocwireError};
pub use log::{LogSink, ScopedLog};
pub use mux::Backend;
pub use peer::PeerId;
pub use receiver::{ChannelReceiver, Message, Receiver};
pub use server::Server;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
