//! Server lifecycle wrapper.
//!
//! A [`Server`] owns a [`ListenerTransport`] and one background thread that
//! drives it: create → bind/listen → serve → teardown. Frames go to the
//! receiver installed by [`Server::start`]; replies go out through
//! [`Server::send_data`] from any thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use socwire::{PeerId, Server, TransportConfig};
//!
//! let server = Server::new(TransportConfig::default());
//! server
//!     .start(Arc::new(|peer: PeerId, data: &[u8]| {
//!         println!("{} sent {} bytes", peer, data.len());
//!     }))
//!     .unwrap();
//! // ...
//! server.end();
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
use crate::transport::ListenerTransport;

/// Accepting endpoint with its own background task.
pub struct Server {
    transport: Arc<ListenerTransport>,
    receiver: ReceiverSlot,
    task: Mutex<Option<BackgroundTask>>,
    config: TransportConfig,
    log: ScopedLog,
}

impl Server {
    /// Create a stopped server.
    pub fn new(config: TransportConfig) -> Self {
        Self::with_log(config, ScopedLog::new(0, "<Server>"))
    }

    /// Create a stopped server that reports through `log`.
    pub fn with_log(config: TransportConfig, log: ScopedLog) -> Self {
        Self {
            transport: Arc::new(ListenerTransport::new(&config, log.clone())),
            receiver: ReceiverSlot::default(),
            task: Mutex::new(None),
            config,
            log,
        }
    }

    /// Install `receiver` and start serving.
    ///
    /// While the task is running this only replaces the receiver. A task
    /// that stopped on its own (bind failure) is replaced by a fresh one.
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
        *task = Some(BackgroundTask::spawn("socwire-server", move |cancel| {
            serve(&transport, &receiver, &config, &log, &cancel)
        })?);
        Ok(())
    }

    /// Stop serving and release every socket.
    ///
    /// Blocks until the background task has exited. Safe to call more than
    /// once and on a server that was never started.
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

    /// Send one frame to `peer`.
    pub fn send_data(&self, peer: PeerId, data: &[u8]) -> Result<()> {
        self.transport.send(peer, data)
    }

    /// Close one peer. Returns `false` if it was not connected.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        self.transport.disconnect(peer)
    }

    /// Whether `peer` is currently connected.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.transport.is_connected(peer)
    }

    /// Currently connected peers.
    pub fn peers(&self) -> Vec<PeerId> {
        self.transport.peers()
    }

    /// Bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.end();
    }
}

fn serve(
    transport: &ListenerTransport,
    receiver: &ReceiverSlot,
    config: &TransportConfig,
    log: &ScopedLog,
    cancel: &CancellationToken,
) {
    log.info(format_args!("server task start"));

    let ready = transport
        .create()
        .and_then(|()| transport.bind_and_listen());
    if let Err(e) = ready {
        log.error(format_args!("server abort: {}", e));
        transport.destroy();
        return;
    }

    while !cancel.is_cancelled() {
        let polled = transport.poll_once(cancel, |peer, data| receiver.deliver(peer, data, log));
        if let Err(e) = polled {
            log.warn(format_args!("poll failed: {}", e));
            sleep_unless_cancelled(cancel, config.retry_interval());
        }
    }

    transport.disconnect_all();
    transport.destroy();
    log.info(format_args!("server task end"));
}
