//! Accepting side of the transport.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::{Result, SocwireError};
use crate::log::ScopedLog;
use crate::mux::{Readiness, ReadinessKind};
use crate::peer::PeerId;

use super::connection::{Connection, Endpoint, Received};

/// Listening socket plus its live peer set.
///
/// Every accepted socket is non-blocking, tracked under a fresh
/// [`PeerId`] and armed for reads. A peer stays in the set until it closes,
/// is disconnected explicitly, or the transport is destroyed.
pub struct ListenerTransport {
    conn: Connection,
    addr: SocketAddr,
    backlog: i32,
    poll_timeout: std::time::Duration,
    log: ScopedLog,
}

impl ListenerTransport {
    /// Create an uninitialized listener for `config`.
    pub fn new(config: &TransportConfig, log: ScopedLog) -> Self {
        Self {
            conn: Connection::new(config, log.clone()),
            addr: config.socket_addr(),
            backlog: config.backlog,
            poll_timeout: config.poll_timeout(),
            log,
        }
    }

    /// Allocate the listening socket and the multiplexer.
    pub fn create(&self) -> Result<()> {
        self.conn.create()
    }

    /// Release every descriptor. Idempotent.
    pub fn destroy(&self) {
        self.conn.destroy();
    }

    /// Bind the configured address and start listening.
    ///
    /// Address reuse is enabled so a restarted server can bind a port
    /// still in `TIME_WAIT`.
    pub fn bind_and_listen(&self) -> Result<()> {
        let primary = self.conn.primary().ok_or(SocwireError::NotConnected)?;
        let socket = primary.socket();

        socket
            .set_reuse_address(true)
            .map_err(|source| SocwireError::Bind {
                addr: self.addr,
                source,
            })?;
        socket
            .bind(&self.addr.into())
            .map_err(|source| SocwireError::Bind {
                addr: self.addr,
                source,
            })?;
        socket.listen(self.backlog).map_err(SocwireError::Listen)?;
        socket.set_nonblocking(true)?;

        self.log.info(format_args!(
            "listen {}",
            self.local_addr().unwrap_or(self.addr)
        ));
        Ok(())
    }

    /// One bounded wait on the listening socket and every live peer.
    ///
    /// Accepts pending connections, disconnects closed peers, and reads one
    /// frame from each readable peer, handing it to `on_frame`. A failed
    /// read on one peer is logged and does not stop the others. A frame
    /// read in progress gives up once `cancel` fires.
    pub fn poll_once<F>(&self, cancel: &CancellationToken, mut on_frame: F) -> Result<()>
    where
        F: FnMut(PeerId, &[u8]),
    {
        let primary = self.conn.primary().ok_or(SocwireError::NotConnected)?;
        self.conn.arm(&primary)?;

        let mut events = Vec::new();
        let waited = self.conn.wait(self.poll_timeout, &mut events);
        if waited.is_ok() {
            for Readiness { peer, kind } in events {
                if peer == primary.id() {
                    self.accept(&primary);
                    continue;
                }
                if !self.conn.is_connected(peer) {
                    continue;
                }
                match kind {
                    ReadinessKind::Closed => {
                        self.conn.close_peer(peer);
                    }
                    ReadinessKind::Readable => self.dispatch(peer, cancel, &mut on_frame),
                }
            }
        }

        self.conn.disarm(primary.id());
        waited
    }

    fn accept(&self, primary: &Endpoint) {
        let (socket, remote) = match primary.socket().accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                self.log.warn(format_args!("accept failed: {}", e));
                return;
            }
        };
        if let Err(e) = socket.set_nonblocking(true) {
            self.log.warn(format_args!("accept nonblocking failed: {}", e));
            return;
        }

        let endpoint = Arc::new(Endpoint::new(self.conn.next_peer_id(), socket));
        let id = endpoint.id();
        self.conn.insert_peer(endpoint.clone());
        if let Err(e) = self.conn.arm(&endpoint) {
            self.log.warn(format_args!("arm peer {} failed: {}", id, e));
            self.conn.close_peer(id);
            return;
        }

        let remote = remote
            .as_socket()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        self.log.info(format_args!("accept peer {} {}", id, remote));
    }

    fn dispatch<F>(&self, peer: PeerId, cancel: &CancellationToken, on_frame: &mut F)
    where
        F: FnMut(PeerId, &[u8]),
    {
        match self.conn.receive(peer, cancel) {
            Ok(Received::Frame(payload)) => on_frame(peer, &payload),
            // The multiplexer reports the close on its next wait.
            Ok(Received::Closed) => {}
            Err(SocwireError::Cancelled) => {
                self.log.debug(format_args!("recv peer {} cancelled", peer));
            }
            Err(e) => self.log.warn(format_args!("recv peer {}: {}", peer, e)),
        }
    }

    /// Frame and send `payload` to `peer`.
    pub fn send(&self, peer: PeerId, payload: &[u8]) -> Result<()> {
        self.conn.send(peer, payload)
    }

    /// Close one peer. Returns `false` if it was not connected.
    pub fn disconnect(&self, peer: PeerId) -> bool {
        self.conn.close_peer(peer)
    }

    /// Close every live peer.
    pub fn disconnect_all(&self) {
        for peer in self.conn.peer_ids() {
            self.conn.close_peer(peer);
        }
    }

    /// Whether `peer` is in the live set.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.conn.is_connected(peer)
    }

    /// Live peers in ascending id order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.conn.peer_ids()
    }

    /// Bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }
}
