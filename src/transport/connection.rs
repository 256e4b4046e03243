//! Raw connection state and byte-exact framed I/O.
//!
//! A [`Connection`] owns the primary socket of a transport (the listening
//! socket for a server, the connected socket for a client), the set of
//! live peer descriptors, and the multiplexer handle. It moves through
//! Uninitialized → Created → Closed and may be created again after being
//! closed.
//!
//! # Locking
//!
//! - The primary socket and the peer set share one mutex. Membership
//!   checks, insertion and removal all happen under it.
//! - The multiplexer has its own mutex so a bounded wait never holds up a
//!   sender. When both are needed the multiplexer is locked first.
//! - Each endpoint carries a write lock held for a whole frame, so frames
//!   from concurrent senders never interleave.
//!
//! Endpoints are reference counted. Removing a peer shuts its socket down,
//! which fails any in-flight write, and parks the endpoint until the next
//! wait disarms it. The descriptor itself is closed once the last holder
//! lets go, so a parked descriptor number can't be reused while still
//! registered.
//!
//! Frame reads and writes fail with `TimedOut` once they go `io_timeout`
//! without progress. Reads also stop early when the caller's
//! cancellation token fires.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use std::ops::Deref;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::{Result, SocwireError};
use crate::lock;
use crate::log::ScopedLog;
use crate::mux::{wait_writable, Backend, Multiplexer, Readiness};
use crate::peer::PeerId;
use crate::protocol::{decode_header, encode_frame, HEADER_SIZE};

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Initial capacity of the receive buffer.
const RECV_BUFFER_CAPACITY: usize = 64 * 1024;

/// One socket plus the lock that keeps its outbound frames whole.
pub struct Endpoint {
    id: PeerId,
    socket: Socket,
    write_lock: Mutex<()>,
}

impl Endpoint {
    pub(crate) fn new(id: PeerId, socket: Socket) -> Self {
        suppress_sigpipe(&socket);
        Self {
            id,
            socket,
            write_lock: Mutex::new(()),
        }
    }

    /// Identifier under which this endpoint is tracked.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Underlying socket.
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    fn shutdown(&self) {
        let _ = self.socket.shutdown(Shutdown::Both);
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn suppress_sigpipe(socket: &Socket) {
    let _ = socket.set_nosigpipe(true);
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd")))]
fn suppress_sigpipe(_socket: &Socket) {}

/// Result of one [`Connection::receive`].
pub enum Received<'a> {
    /// A complete frame; derefs to its payload.
    Frame(FramePayload<'a>),
    /// The peer closed the stream before a complete frame arrived.
    Closed,
}

/// Payload of a received frame, borrowed from the connection's buffer.
pub struct FramePayload<'a> {
    buffer: MutexGuard<'a, BytesMut>,
}

impl Deref for FramePayload<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buffer
    }
}

enum ReadStatus {
    Complete,
    Closed,
    Cancelled,
}

#[derive(Default)]
struct Sockets {
    primary: Option<Arc<Endpoint>>,
    peers: BTreeMap<PeerId, Arc<Endpoint>>,
    /// Closed peers still registered with the multiplexer.
    closing: Vec<Arc<Endpoint>>,
}

/// Socket state shared by a transport's background task and its senders.
pub struct Connection {
    sockets: Mutex<Sockets>,
    mux: Mutex<Option<Box<dyn Multiplexer>>>,
    recv_buffer: Mutex<BytesMut>,
    next_id: AtomicU64,
    domain: Domain,
    backend: Backend,
    max_frame_size: u32,
    retry_interval: Duration,
    io_timeout: Duration,
    log: ScopedLog,
}

impl Connection {
    /// Create an uninitialized connection for `config`.
    pub fn new(config: &TransportConfig, log: ScopedLog) -> Self {
        Self {
            sockets: Mutex::new(Sockets::default()),
            mux: Mutex::new(None),
            recv_buffer: Mutex::new(BytesMut::with_capacity(RECV_BUFFER_CAPACITY)),
            next_id: AtomicU64::new(1),
            domain: Domain::for_address(config.socket_addr()),
            backend: config.backend,
            max_frame_size: config.max_frame_size,
            retry_interval: config.retry_interval(),
            io_timeout: config.io_timeout(),
            log,
        }
    }

    /// Allocate the primary socket and the multiplexer.
    ///
    /// Does nothing if already created.
    pub fn create(&self) -> Result<()> {
        let mut mux = lock(&self.mux);
        let mut sockets = lock(&self.sockets);
        if sockets.primary.is_some() {
            return Ok(());
        }

        let socket = Socket::new(self.domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(SocwireError::Allocation)?;
        let handle = self.backend.open().map_err(SocwireError::Allocation)?;

        let endpoint = Endpoint::new(self.next_peer_id(), socket);
        self.log.debug(format_args!(
            "create sock {} fd:{} ({:?})",
            endpoint.id,
            endpoint.as_raw_fd(),
            self.backend
        ));
        sockets.primary = Some(Arc::new(endpoint));
        *mux = Some(handle);
        Ok(())
    }

    /// Release the multiplexer, then every descriptor. Idempotent.
    pub fn destroy(&self) {
        let mut mux = lock(&self.mux);
        if mux.take().is_some() {
            self.log.debug(format_args!("close multiplexer"));
        }

        let mut sockets = lock(&self.sockets);
        sockets.closing.clear();
        for (id, peer) in std::mem::take(&mut sockets.peers) {
            self.log.debug(format_args!("close peer {}", id));
            peer.shutdown();
        }
        if let Some(primary) = sockets.primary.take() {
            self.log.debug(format_args!("close sock {}", primary.id));
            primary.shutdown();
        }
    }

    /// Whether `create` has run since the last `destroy`.
    pub fn is_created(&self) -> bool {
        lock(&self.sockets).primary.is_some()
    }

    /// Primary socket, if created.
    pub fn primary(&self) -> Option<Arc<Endpoint>> {
        lock(&self.sockets).primary.clone()
    }

    /// Allocate an id that is unique for the lifetime of this connection.
    pub fn next_peer_id(&self) -> PeerId {
        PeerId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add an endpoint to the live peer set.
    pub fn insert_peer(&self, endpoint: Arc<Endpoint>) {
        lock(&self.sockets).peers.insert(endpoint.id, endpoint);
    }

    /// Remove an endpoint from the live peer set without closing it.
    pub fn remove_peer(&self, id: PeerId) -> Option<Arc<Endpoint>> {
        lock(&self.sockets).peers.remove(&id)
    }

    /// Whether `id` is in the live peer set.
    pub fn is_connected(&self, id: PeerId) -> bool {
        lock(&self.sockets).peers.contains_key(&id)
    }

    /// Ids of all live peers, in ascending order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        lock(&self.sockets).peers.keys().copied().collect()
    }

    /// Local address of the primary socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.primary()?
            .socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
    }

    /// Watch an endpoint for readiness.
    pub fn arm(&self, endpoint: &Endpoint) -> Result<()> {
        let mut mux = lock(&self.mux);
        let handle = mux.as_mut().ok_or(SocwireError::NotConnected)?;
        handle.arm(endpoint.id, endpoint.as_raw_fd())?;
        Ok(())
    }

    /// Stop watching an endpoint. No-op when not armed.
    pub fn disarm(&self, id: PeerId) {
        if let Some(handle) = lock(&self.mux).as_mut() {
            handle.disarm(id);
        }
    }

    /// One bounded multiplexer wait.
    ///
    /// Peers closed since the previous wait are disarmed and released
    /// first. Events may still name a peer that was closed during the wait.
    pub fn wait(&self, timeout: Duration, events: &mut Vec<Readiness>) -> Result<()> {
        let mut mux = lock(&self.mux);
        let handle = mux.as_mut().ok_or(SocwireError::NotConnected)?;
        let closed = std::mem::take(&mut lock(&self.sockets).closing);
        for peer in closed {
            handle.disarm(peer.id);
        }
        handle.wait(timeout, events)?;
        Ok(())
    }

    /// Remove a peer and shut its socket down.
    ///
    /// Never waits on the multiplexer: the endpoint is disarmed by the next
    /// [`wait`](Self::wait). Returns `false` if `id` was not a live peer.
    pub fn close_peer(&self, id: PeerId) -> bool {
        let mut sockets = lock(&self.sockets);
        let Some(peer) = sockets.peers.remove(&id) else {
            return false;
        };
        peer.shutdown();
        sockets.closing.push(peer);
        drop(sockets);

        self.log.debug(format_args!("disconnect peer {}", id));
        true
    }

    /// Frame `payload` and write it to peer `id`.
    ///
    /// Fails with `NotConnected` when `id` is not a live peer. The write
    /// runs to completion: short writes continue where they stopped.
    pub fn send(&self, id: PeerId, payload: &[u8]) -> Result<()> {
        let peer = lock(&self.sockets).peers.get(&id).cloned();
        let Some(peer) = peer else {
            self.log.warn(format_args!("send to disconnected peer {}", id));
            return Err(SocwireError::NotConnected);
        };
        self.send_to(&peer, payload)
    }

    /// Frame `payload` and write it to the primary socket.
    ///
    /// The primary socket only counts as connected while it is in the
    /// peer set.
    pub fn send_primary(&self, payload: &[u8]) -> Result<()> {
        let peer = {
            let sockets = lock(&self.sockets);
            sockets
                .primary
                .as_ref()
                .filter(|primary| sockets.peers.contains_key(&primary.id))
                .cloned()
        };
        let Some(peer) = peer else {
            self.log.warn(format_args!("send while not connected"));
            return Err(SocwireError::NotConnected);
        };
        self.send_to(&peer, payload)
    }

    fn send_to(&self, peer: &Endpoint, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload, self.max_frame_size)?;

        let _guard = lock(&peer.write_lock);
        if let Err(e) = self.write_all_retrying(peer, &frame) {
            self.log
                .warn(format_args!("send peer {} failed: {}", peer.id, e));
            return Err(match e.kind() {
                io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::WriteZero => SocwireError::PeerClosed,
                _ => e.into(),
            });
        }
        self.log.debug(format_args!(
            "send peer {} -> size:{}",
            peer.id,
            frame.len()
        ));
        Ok(())
    }

    /// Read exactly one frame from peer `id`.
    ///
    /// Returns `Received::Closed` when the peer closes mid-frame or before
    /// a header arrives, `Protocol`/`FrameTooLarge` for an invalid header,
    /// `Cancelled` once `cancel` fires, and `Io` for any other failure
    /// (`TimedOut` when the frame stalls past the I/O timeout).
    pub fn receive(&self, id: PeerId, cancel: &CancellationToken) -> Result<Received<'_>> {
        let peer = lock(&self.sockets).peers.get(&id).cloned();
        let peer = peer.ok_or(SocwireError::NotConnected)?;

        let mut header = [0u8; HEADER_SIZE];
        match self.read_exact_retrying(&peer.socket, &mut header, cancel) {
            Ok(ReadStatus::Complete) => {}
            Ok(ReadStatus::Closed) => {
                self.log.debug(format_args!("recv head disconnect {}", id));
                return Ok(Received::Closed);
            }
            Ok(ReadStatus::Cancelled) => return Err(SocwireError::Cancelled),
            Err(e) => {
                self.log.warn(format_args!("recv head {} failed: {}", id, e));
                return Err(e.into());
            }
        }

        let header = match decode_header(&header, self.max_frame_size) {
            Ok(header) => header,
            Err(e) => {
                self.log.warn(format_args!("recv head {} invalid: {}", id, e));
                return Err(e);
            }
        };
        let size = header.payload_size as usize;

        let mut buffer = lock(&self.recv_buffer);
        buffer.clear();
        buffer.resize(size, 0);

        match self.read_exact_retrying(&peer.socket, &mut buffer[..], cancel) {
            Ok(ReadStatus::Complete) => {
                self.log
                    .debug(format_args!("recv data {} -> size:{}", id, size));
                Ok(Received::Frame(FramePayload { buffer }))
            }
            Ok(ReadStatus::Closed) => {
                self.log.debug(format_args!("recv data disconnect {}", id));
                Ok(Received::Closed)
            }
            Ok(ReadStatus::Cancelled) => Err(SocwireError::Cancelled),
            Err(e) => {
                self.log.warn(format_args!("recv data {} failed: {}", id, e));
                Err(e.into())
            }
        }
    }

    /// Fill `buf` completely, sleeping on would-block.
    ///
    /// Never reports a partial read: the buffer is either full, or the
    /// peer closed, or the read was cancelled, or an error is returned.
    fn read_exact_retrying(
        &self,
        socket: &Socket,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> io::Result<ReadStatus> {
        let mut filled = 0;
        let mut deadline = Instant::now() + self.io_timeout;
        while filled < buf.len() {
            match (&*socket).read(&mut buf[filled..]) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => {
                    filled += n;
                    deadline = Instant::now() + self.io_timeout;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if cancel.is_cancelled() {
                        return Ok(ReadStatus::Cancelled);
                    }
                    if Instant::now() >= deadline {
                        return Err(stalled(filled, buf.len()));
                    }
                    std::thread::sleep(self.retry_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(ReadStatus::Complete)
    }

    /// Write all of `data`, waiting for socket space on would-block.
    fn write_all_retrying(&self, peer: &Endpoint, mut data: &[u8]) -> io::Result<()> {
        let total = data.len();
        let mut deadline = Instant::now() + self.io_timeout;
        while !data.is_empty() {
            match peer.socket.send_with_flags(data, SEND_FLAGS) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    data = &data[n..];
                    deadline = Instant::now() + self.io_timeout;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(stalled(total - data.len(), total));
                    }
                    wait_writable(peer.as_raw_fd(), self.retry_interval)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn stalled(done: usize, total: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("frame stalled at {} of {} bytes", done, total),
    )
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, Header};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    /// Connection whose single peer is the accepted end of a loopback pair.
    fn connected(config: &TransportConfig) -> (Connection, PeerId, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let conn = Connection::new(config, ScopedLog::default());
        conn.create().unwrap();
        let id = conn.next_peer_id();
        conn.insert_peer(Arc::new(Endpoint::new(id, Socket::from(accepted))));
        (conn, id, remote)
    }

    fn fast_config() -> TransportConfig {
        TransportConfig::default().with_retry_interval(Duration::from_millis(1))
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = Connection::new(&TransportConfig::default(), ScopedLog::default());
        assert!(!conn.is_created());

        conn.create().unwrap();
        let first = conn.primary().unwrap().id();
        conn.create().unwrap();
        assert_eq!(conn.primary().unwrap().id(), first);
    }

    #[test]
    fn test_destroy_is_idempotent_and_allows_recreate() {
        let conn = Connection::new(&TransportConfig::default(), ScopedLog::default());
        conn.destroy();

        conn.create().unwrap();
        conn.destroy();
        conn.destroy();
        assert!(!conn.is_created());

        conn.create().unwrap();
        assert!(conn.is_created());
    }

    #[test]
    fn test_send_to_unknown_peer_fails() {
        let conn = Connection::new(&TransportConfig::default(), ScopedLog::default());
        conn.create().unwrap();

        let err = conn.send(PeerId::new(99), b"data").unwrap_err();
        assert!(matches!(err, SocwireError::NotConnected));
        assert!(matches!(
            conn.send_primary(b"data").unwrap_err(),
            SocwireError::NotConnected
        ));
    }

    #[test]
    fn test_receive_reassembles_fragmented_frame() {
        let (conn, id, mut remote) = connected(&fast_config());
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 253) as u8).collect();
        let frame = build_frame(&Header::new(payload.len() as i32), &payload);

        let writer = std::thread::spawn(move || {
            for chunk in frame.chunks(777) {
                remote.write_all(chunk).unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
            remote
        });

        match conn.receive(id, &CancellationToken::new()).unwrap() {
            Received::Frame(data) => assert_eq!(&data[..], &payload[..]),
            Received::Closed => panic!("unexpected close"),
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_receive_empty_payload() {
        let (conn, id, mut remote) = connected(&fast_config());
        remote.write_all(&Header::new(0).encode()).unwrap();

        match conn.receive(id, &CancellationToken::new()).unwrap() {
            Received::Frame(data) => assert!(data.is_empty()),
            Received::Closed => panic!("unexpected close"),
        };
    }

    #[test]
    fn test_receive_bad_magic() {
        let (conn, id, mut remote) = connected(&fast_config());
        let mut bytes = Header::new(3).encode();
        bytes[0] = b'X';
        remote.write_all(&bytes).unwrap();

        assert!(matches!(conn.receive(id, &CancellationToken::new()), Err(SocwireError::Protocol(_))));
    }

    #[test]
    fn test_receive_oversized_frame() {
        let (conn, id, mut remote) = connected(&fast_config().with_max_frame_size(16));
        remote.write_all(&Header::new(17).encode()).unwrap();

        assert!(matches!(
            conn.receive(id, &CancellationToken::new()),
            Err(SocwireError::FrameTooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_receive_close_mid_payload() {
        let (conn, id, mut remote) = connected(&fast_config());
        remote.write_all(&Header::new(100).encode()).unwrap();
        remote.write_all(&[1, 2, 3]).unwrap();
        drop(remote);

        assert!(matches!(conn.receive(id, &CancellationToken::new()).unwrap(), Received::Closed));
    }

    #[test]
    fn test_send_writes_exact_frame() {
        let (conn, id, mut remote) = connected(&fast_config());
        conn.send(id, b"hello").unwrap();

        let mut buf = [0u8; HEADER_SIZE + 5];
        std::io::Read::read_exact(&mut remote, &mut buf).unwrap();
        assert_eq!(&buf[..3], b"SOC");
        assert_eq!(Header::decode(&buf).unwrap().payload_size, 5);
        assert_eq!(&buf[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn test_send_large_frame_completes() {
        let (conn, id, mut remote) = connected(&fast_config());
        let payload = vec![0x5A; 4 * 1024 * 1024];

        let reader = std::thread::spawn(move || {
            let mut buf = vec![0u8; HEADER_SIZE + 4 * 1024 * 1024];
            std::io::Read::read_exact(&mut remote, &mut buf).unwrap();
            buf
        });

        conn.send(id, &payload).unwrap();
        let received = reader.join().unwrap();
        assert_eq!(&received[HEADER_SIZE..], &payload[..]);
    }

    #[test]
    fn test_send_rejects_oversized_payload() {
        let (conn, id, _remote) = connected(&fast_config().with_max_frame_size(8));
        assert!(matches!(
            conn.send(id, &[0u8; 9]),
            Err(SocwireError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_receive_stalled_payload_times_out() {
        let config = fast_config().with_io_timeout(Duration::from_millis(100));
        let (conn, id, mut remote) = connected(&config);
        remote.write_all(&Header::new(10).encode()).unwrap();
        remote.write_all(&[1, 2]).unwrap();

        let start = std::time::Instant::now();
        match conn.receive(id, &CancellationToken::new()) {
            Err(SocwireError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("stalled frame was delivered"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(conn.is_connected(id));
    }

    #[test]
    fn test_receive_stops_when_cancelled() {
        let config = fast_config().with_io_timeout(Duration::from_secs(60));
        let (conn, id, mut remote) = connected(&config);
        remote.write_all(&Header::new(10).encode()).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        assert!(matches!(
            conn.receive(id, &cancel),
            Err(SocwireError::Cancelled)
        ));
        assert!(start.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn test_send_to_non_reading_peer_times_out() {
        let config = fast_config().with_io_timeout(Duration::from_millis(200));
        let (conn, id, _remote) = connected(&config);
        // Far more than both socket buffers hold; the remote never reads.
        let payload = vec![0u8; 32 * 1024 * 1024];

        let start = std::time::Instant::now();
        match conn.send(id, &payload) {
            Err(SocwireError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("expected a timeout, got {:?}", other.err()),
        }
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_close_peer_does_not_wait_for_multiplexer() {
        let (conn, id, _remote) = connected(&fast_config());
        let endpoint = lock(&conn.sockets).peers.get(&id).cloned().unwrap();
        conn.arm(&endpoint).unwrap();
        drop(endpoint);

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let mut events = Vec::new();
                conn.wait(Duration::from_secs(2), &mut events).unwrap();
            });
            std::thread::sleep(Duration::from_millis(50));

            let start = std::time::Instant::now();
            assert!(conn.close_peer(id));
            assert!(start.elapsed() < Duration::from_millis(500));
            waiter.join().unwrap();
        });

        // The next wait releases the parked endpoint.
        let mut events = Vec::new();
        conn.wait(Duration::from_millis(10), &mut events).unwrap();
        assert!(lock(&conn.sockets).closing.is_empty());
        assert!(!conn.is_connected(id));
    }

    #[test]
    fn test_send_to_closed_remote_reports_peer_closed() {
        let (conn, id, remote) = connected(&fast_config());
        drop(remote);

        let mut result = Ok(());
        for _ in 0..100 {
            result = conn.send(id, b"into the void");
            if result.is_err() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(result, Err(SocwireError::PeerClosed)));
    }

    #[test]
    fn test_close_peer_removes_membership() {
        let (conn, id, _remote) = connected(&fast_config());
        assert!(conn.is_connected(id));
        assert_eq!(conn.peer_ids(), vec![id]);

        assert!(conn.close_peer(id));
        assert!(!conn.close_peer(id));
        assert!(!conn.is_connected(id));
        assert!(matches!(
            conn.send(id, b"late"),
            Err(SocwireError::NotConnected)
        ));
    }
}
