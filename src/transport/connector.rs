//! Connecting side of the transport.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::{Result, SocwireError};
use crate::log::ScopedLog;
use crate::mux::ReadinessKind;

use super::connection::{Connection, Received};

/// What one [`ConnectorTransport::poll_once`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Timed out, or delivered zero or more frames.
    Idle,
    /// The server closed the connection.
    PeerClosed,
    /// The wait or a read failed. The failure has been logged.
    Failed,
}

/// Single outbound connection.
///
/// The connected socket is the primary socket of the underlying
/// [`Connection`] and counts as connected only while it is also in the
/// peer set.
pub struct ConnectorTransport {
    conn: Connection,
    addr: SocketAddr,
    poll_timeout: Duration,
    log: ScopedLog,
}

impl ConnectorTransport {
    /// Create an uninitialized connector for `config`.
    pub fn new(config: &TransportConfig, log: ScopedLog) -> Self {
        Self {
            conn: Connection::new(config, log.clone()),
            addr: config.socket_addr(),
            poll_timeout: config.poll_timeout(),
            log,
        }
    }

    /// Allocate the socket and the multiplexer.
    pub fn create(&self) -> Result<()> {
        self.conn.create()
    }

    /// Release the socket and the multiplexer. Idempotent.
    pub fn destroy(&self) {
        self.conn.destroy();
    }

    /// Connect to the configured endpoint.
    ///
    /// The handshake is bounded by the poll timeout. On success the socket
    /// becomes non-blocking and joins the peer set.
    pub fn connect(&self) -> Result<()> {
        let primary = self.conn.primary().ok_or(SocwireError::NotConnected)?;
        let timeout = self.poll_timeout.max(Duration::from_millis(1));

        primary
            .socket()
            .connect_timeout(&self.addr.into(), timeout)
            .map_err(|source| SocwireError::Connect {
                addr: self.addr,
                source,
            })?;
        primary.socket().set_nonblocking(true)?;
        let _ = primary.socket().set_nodelay(true);

        self.conn.insert_peer(primary.clone());
        self.log.info(format_args!("connect {} as {}", self.addr, primary.id()));
        Ok(())
    }

    /// Stop treating the socket as connected. It stays open until
    /// [`destroy`](Self::destroy).
    pub fn disconnect(&self) {
        if let Some(primary) = self.conn.primary() {
            if self.conn.remove_peer(primary.id()).is_some() {
                self.log.debug(format_args!("disconnect {}", primary.id()));
            }
        }
    }

    /// Whether the socket is connected.
    pub fn is_connected(&self) -> bool {
        self.conn
            .primary()
            .is_some_and(|primary| self.conn.is_connected(primary.id()))
    }

    /// One bounded wait on the connected socket.
    ///
    /// Reads one frame if readable and hands it to `on_frame`. A frame read
    /// in progress gives up once `cancel` fires.
    pub fn poll_once<F>(&self, cancel: &CancellationToken, mut on_frame: F) -> PollOutcome
    where
        F: FnMut(&[u8]),
    {
        let Some(primary) = self.conn.primary() else {
            return PollOutcome::Failed;
        };
        let id = primary.id();
        if let Err(e) = self.conn.arm(&primary) {
            self.log.warn(format_args!("arm {} failed: {}", id, e));
            return PollOutcome::Failed;
        }

        let mut events = Vec::new();
        let outcome = match self.conn.wait(self.poll_timeout, &mut events) {
            Err(e) => {
                self.log.warn(format_args!("wait failed: {}", e));
                PollOutcome::Failed
            }
            Ok(()) => match events.iter().find(|ev| ev.peer == id).map(|ev| ev.kind) {
                None => PollOutcome::Idle,
                Some(ReadinessKind::Closed) => {
                    self.log.info(format_args!("server closed {}", id));
                    PollOutcome::PeerClosed
                }
                Some(ReadinessKind::Readable) => match self.conn.receive(id, cancel) {
                    Ok(Received::Frame(payload)) => {
                        on_frame(&payload);
                        PollOutcome::Idle
                    }
                    Ok(Received::Closed) => {
                        self.log.info(format_args!("server closed {}", id));
                        PollOutcome::PeerClosed
                    }
                    Err(SocwireError::Cancelled) => PollOutcome::Idle,
                    Err(e) => {
                        self.log.warn(format_args!("recv {} failed: {}", id, e));
                        PollOutcome::Failed
                    }
                },
            },
        };

        self.conn.disarm(id);
        outcome
    }

    /// Frame and send `payload` to the server.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.conn.send_primary(payload)
    }

    /// Local address of the connected socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.conn.local_addr()
    }
}
