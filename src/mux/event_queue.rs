//! Kernel event queue backend (`mio`).
//!
//! `mio` registrations are edge-triggered. Every armed descriptor is
//! re-registered before each wait, which makes the kernel re-evaluate its
//! state, so a descriptor that still holds unread data is reported again.

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use super::{at_end_of_stream, Multiplexer, Readiness, ReadinessKind};
use crate::peer::PeerId;

/// Maximum events drained by one wait.
const EVENT_CAPACITY: usize = 64;

/// Multiplexer over epoll (Linux) or kqueue (BSD/macOS).
pub struct EventQueue {
    poll: Poll,
    events: Events,
    armed: HashMap<PeerId, RawFd>,
}

impl EventQueue {
    /// Allocate the kernel queue.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            armed: HashMap::new(),
        })
    }

    fn token(peer: PeerId) -> Token {
        Token(peer.get() as usize)
    }
}

impl Multiplexer for EventQueue {
    fn arm(&mut self, peer: PeerId, fd: RawFd) -> io::Result<()> {
        let registry = self.poll.registry();
        match self.armed.get(&peer) {
            Some(&armed_fd) if armed_fd == fd => {
                registry.reregister(&mut SourceFd(&fd), Self::token(peer), Interest::READABLE)
            }
            Some(&stale_fd) => {
                let _ = registry.deregister(&mut SourceFd(&stale_fd));
                registry.register(&mut SourceFd(&fd), Self::token(peer), Interest::READABLE)?;
                self.armed.insert(peer, fd);
                Ok(())
            }
            None => {
                registry.register(&mut SourceFd(&fd), Self::token(peer), Interest::READABLE)?;
                self.armed.insert(peer, fd);
                Ok(())
            }
        }
    }

    fn disarm(&mut self, peer: PeerId) {
        if let Some(fd) = self.armed.remove(&peer) {
            // Fails harmlessly when the descriptor is already closed.
            let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
        }
    }

    fn wait(&mut self, timeout: Duration, events: &mut Vec<Readiness>) -> io::Result<()> {
        events.clear();

        let registry = self.poll.registry();
        for (&peer, &fd) in &self.armed {
            registry.reregister(&mut SourceFd(&fd), Self::token(peer), Interest::READABLE)?;
        }

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let peer = PeerId::new(event.token().0 as u64);
            let Some(&fd) = self.armed.get(&peer) else {
                continue;
            };

            let closed = event.is_error()
                || ((event.is_read_closed() || event.is_readable()) && at_end_of_stream(fd));
            events.push(Readiness {
                peer,
                kind: if closed {
                    ReadinessKind::Closed
                } else {
                    ReadinessKind::Readable
                },
            });
        }

        Ok(())
    }

    fn armed(&self) -> usize {
        self.armed.len()
    }
}
