//! Readiness multiplexing.
//!
//! A [`Multiplexer`] watches a set of socket descriptors and reports, within
//! one bounded wait, which of them can be read from or have reached
//! end-of-stream. Two backends implement the same contract:
//!
//! - [`EventQueue`] - epoll/kqueue through `mio`
//! - [`DescriptorSet`] - `poll(2)` over a descriptor array
//!
//! Both behave level-triggered from the caller's point of view: a
//! descriptor with unread data is reported again on the next wait.
//! A descriptor is reported as [`ReadinessKind::Closed`] only once its
//! peer has finished sending and no unread bytes remain, or when the
//! descriptor is in an error/hang-up state.

mod descriptor_set;
mod event_queue;

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use descriptor_set::DescriptorSet;
pub use event_queue::EventQueue;

use crate::peer::PeerId;

/// What a wait observed on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessKind {
    /// Data (or a pending connection) is available.
    Readable,
    /// End-of-stream or hang-up; nothing more will arrive.
    Closed,
}

/// One readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Descriptor the event refers to.
    pub peer: PeerId,
    /// Observed condition.
    pub kind: ReadinessKind,
}

/// Readiness notification over a set of descriptors.
pub trait Multiplexer: Send {
    /// Start watching `fd` for reads, reported under `peer`.
    ///
    /// Arming an already armed descriptor is not an error.
    fn arm(&mut self, peer: PeerId, fd: RawFd) -> io::Result<()>;

    /// Stop watching the descriptor registered under `peer`.
    ///
    /// Disarming an unknown or already closed descriptor is a no-op.
    fn disarm(&mut self, peer: PeerId);

    /// Block up to `timeout` and fill `events` with what became ready.
    ///
    /// `events` is cleared first; an empty result means the wait timed out.
    fn wait(&mut self, timeout: Duration, events: &mut Vec<Readiness>) -> io::Result<()>;

    /// Number of armed descriptors.
    fn armed(&self) -> usize;
}

/// Backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Kernel event queue (epoll on Linux, kqueue on BSD/macOS).
    #[default]
    EventQueue,
    /// `poll(2)` over the armed descriptors.
    DescriptorSet,
}

impl Backend {
    /// Allocate a multiplexer of this kind.
    pub fn open(self) -> io::Result<Box<dyn Multiplexer>> {
        Ok(match self {
            Backend::EventQueue => Box::new(EventQueue::new()?),
            Backend::DescriptorSet => Box::new(DescriptorSet::new()),
        })
    }
}

/// Whether a readable descriptor is at end-of-stream with nothing left
/// to read. Non-stream descriptors (listeners) always report `false`.
pub(crate) fn at_end_of_stream(fd: RawFd) -> bool {
    let mut byte = 0u8;
    // SAFETY: `fd` is a socket owned by the caller for the duration of the
    // call and the buffer is one writable byte.
    let n = unsafe {
        libc::recv(
            fd,
            (&mut byte as *mut u8).cast::<libc::c_void>(),
            1,
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    };
    n == 0
}

/// Wait until `fd` accepts more outbound bytes or `timeout` elapses.
pub(crate) fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<()> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    // SAFETY: one valid pollfd entry for the duration of the call.
    let ret = unsafe { libc::poll(&mut pollfd, 1, timeout_millis(timeout)) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
    Ok(())
}

pub(crate) fn timeout_millis(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    const BACKENDS: [Backend; 2] = [Backend::EventQueue, Backend::DescriptorSet];
    const SHORT: Duration = Duration::from_millis(200);

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn wait_for(mux: &mut dyn Multiplexer, peer: PeerId) -> Option<ReadinessKind> {
        let mut events = Vec::new();
        for _ in 0..10 {
            mux.wait(SHORT, &mut events).unwrap();
            if let Some(ev) = events.iter().find(|ev| ev.peer == peer) {
                return Some(ev.kind);
            }
        }
        None
    }

    #[test]
    fn test_timeout_returns_empty() {
        for backend in BACKENDS {
            let (_client, server) = pair();
            let mut mux = backend.open().unwrap();
            mux.arm(PeerId::new(1), server.as_raw_fd()).unwrap();

            let mut events = vec![Readiness {
                peer: PeerId::new(99),
                kind: ReadinessKind::Readable,
            }];
            mux.wait(Duration::from_millis(50), &mut events).unwrap();
            assert!(events.is_empty(), "{:?}", backend);
        }
    }

    #[test]
    fn test_readable_is_reported_until_drained() {
        for backend in BACKENDS {
            let (mut client, server) = pair();
            let mut mux = backend.open().unwrap();
            let peer = PeerId::new(5);
            mux.arm(peer, server.as_raw_fd()).unwrap();

            client.write_all(b"ping").unwrap();
            assert_eq!(wait_for(mux.as_mut(), peer), Some(ReadinessKind::Readable));
            // Nothing was read, so the next wait must report it again.
            assert_eq!(wait_for(mux.as_mut(), peer), Some(ReadinessKind::Readable));
        }
    }

    #[test]
    fn test_close_with_pending_data_reports_readable_first() {
        for backend in BACKENDS {
            let (mut client, server) = pair();
            let mut mux = backend.open().unwrap();
            let peer = PeerId::new(2);
            mux.arm(peer, server.as_raw_fd()).unwrap();

            client.write_all(b"last words").unwrap();
            drop(client);

            assert_eq!(wait_for(mux.as_mut(), peer), Some(ReadinessKind::Readable));

            let mut buf = [0u8; 10];
            std::io::Read::read_exact(&mut &server, &mut buf).unwrap();
            assert_eq!(wait_for(mux.as_mut(), peer), Some(ReadinessKind::Closed));
        }
    }

    #[test]
    fn test_arm_and_disarm_are_idempotent() {
        for backend in BACKENDS {
            let (_client, server) = pair();
            let mut mux = backend.open().unwrap();
            let peer = PeerId::new(3);

            mux.arm(peer, server.as_raw_fd()).unwrap();
            mux.arm(peer, server.as_raw_fd()).unwrap();
            assert_eq!(mux.armed(), 1);

            mux.disarm(peer);
            mux.disarm(peer);
            mux.disarm(PeerId::new(42));
            assert_eq!(mux.armed(), 0);
        }
    }

    #[test]
    fn test_listener_readiness() {
        for backend in BACKENDS {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let mut mux = backend.open().unwrap();
            let peer = PeerId::new(1);
            mux.arm(peer, listener.as_raw_fd()).unwrap();

            let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
            assert_eq!(wait_for(mux.as_mut(), peer), Some(ReadinessKind::Readable));
        }
    }

    #[test]
    fn test_backend_serde_names() {
        assert_eq!(
            serde_json::to_string(&Backend::DescriptorSet).unwrap(),
            "\"descriptor_set\""
        );
        assert_eq!(
            serde_json::from_str::<Backend>("\"event_queue\"").unwrap(),
            Backend::EventQueue
        );
    }
}
