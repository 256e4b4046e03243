//! Client lifecycle wrapper.
//!
//! A [`Client`] owns a [`ConnectorTransport`] and one background thread
//! that keeps it connected: create → connect → serve, and on any drop of the
//! connection teardown → create → connect again, until [`Client::end`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socwire::{Client, PeerId, TransportConfig};
//!
//! let client = Client::new(TransportConfig::default());
//! client
//!     .start(Arc::new(|_: PeerId, data: &[u8]| {
//!         println!("server sent {} bytes", data.len());
//!     }))
//!     .unwrap();
//!
//! // Fails with `NotConnected` until the connection is up.
//! let _ = client.send_data(b"hello");
//! client.end();
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::Result;
use crate::lock;
use crate::log::ScopedLog;
use crate::peer::PeerId;
use crate::receiver::{Receiver, ReceiverSlot};
use crate::task::{sleep_unless_cancelled, BackgroundTask};
use crate::transport::{ConnectorTransport, PollOutcome};

/// Id passed to the receiver for frames from the server.
pub const SERVER_PEER: PeerId = PeerId::new(0);

/// Connecting endpoint with its own reconnecting background task.
pub struct Client {
    transport: Arc<ConnectorTransport>,
    receiver: ReceiverSlot,
    task: Mutex<Option<BackgroundTask>>,
    config: TransportConfig,
    log: ScopedLog,
}

impl Client {
    /// Create a stopped client.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_log(config, ScopedLog::new(0, "<Client>"))
    }

    /// Create a stopped client that reports through `log`.
    pub fn with_log(config: TransportConfig, log: ScopedLog) -> Self {
        Self {
            transport: Arc::new(ConnectorTransport::new(&config, log.clone())),
            receiver: ReceiverSlot::default(),
            task: Mutex::new(None),
            config,
            log,
        }
    }

    /// Install `receiver` and start connecting.
    ///
    /// While the task is running this only replaces the receiver.
    pub fn start(&self, receiver: Arc<dyn Receiver>) -> Result<()> {
        self.receiver.set(receiver);

        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        if let Some(mut finished) = task.take() {
            finished.stop();
        }

        let transport = self.transport.clone();
        let receiver = self.receiver.clone();
        let config = self.config.clone();
        let log = self.log.clone();
        *task = Some(BackgroundTask::spawn("socwire-client", move |cancel| {
            run(&transport, &receiver, &config, &log, &cancel)
        })?);
        Ok(())
    }

    /// Stop the task and close the connection.
    ///
    /// Blocks until the background task has exited. Safe to call more than
    /// once and on a client that was never started.
    pub fn end(&self) {
        self.receiver.clear();
        if let Some(mut task) = lock(&self.task).take() {
            task.stop();
        }
    }

    /// Whether the background task is alive.
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Send one frame to the server.
    ///
    /// Fails with `NotConnected` while (re)connecting.
    pub fn send_data(&self, data: &[u8]) -> Result<()> {
        self.transport.send(data)
    }

    /// Whether the connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Local address of the current connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.end();
    }
}

fn run(
    transport: &ConnectorTransport,
    receiver: &ReceiverSlot,
    config: &TransportConfig,
    log: &ScopedLog,
    cancel: &CancellationToken,
) {
    log.info(format_args!("client task start"));

    while !cancel.is_cancelled() {
        let connected = transport.create().and_then(|()| transport.connect());
        if let Err(e) = connected {
            log.debug(format_args!("{}; retrying", e));
            transport.destroy();
            sleep_unless_cancelled(cancel, config.retry_interval());
            continue;
        }

        while !cancel.is_cancelled() {
            let outcome =
                transport.poll_once(cancel, |data| receiver.deliver(SERVER_PEER, data, log));
            match outcome {
                PollOutcome::Idle => {}
                PollOutcome::PeerClosed => break,
                PollOutcome::Failed => sleep_unless_cancelled(cancel, config.retry_interval()),
            }
        }

        transport.disconnect();
        transport.destroy();
    }

    log.info(format_args!("client task end"));
}
