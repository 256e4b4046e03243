//! Descriptor-set backend (`poll(2)`).

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::{at_end_of_stream, timeout_millis, Multiplexer, Readiness, ReadinessKind};
use crate::peer::PeerId;

#[cfg(any(target_os = "linux", target_os = "android"))]
const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLRDHUP;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const READ_EVENTS: libc::c_short = libc::POLLIN;

const FAILURE_EVENTS: libc::c_short = libc::POLLERR | libc::POLLNVAL;

/// Multiplexer that rebuilds a `pollfd` array on every wait.
#[derive(Default)]
pub struct DescriptorSet {
    armed: Vec<(PeerId, RawFd)>,
    pollfds: Vec<libc::pollfd>,
}

impl DescriptorSet {
    /// Create an empty set. Allocation cannot fail.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Multiplexer for DescriptorSet {
    fn arm(&mut self, peer: PeerId, fd: RawFd) -> io::Result<()> {
        match self.armed.iter_mut().find(|(p, _)| *p == peer) {
            Some(entry) => entry.1 = fd,
            None => self.armed.push((peer, fd)),
        }
        Ok(())
    }

    fn disarm(&mut self, peer: PeerId) {
        self.armed.retain(|(p, _)| *p != peer);
    }

    fn wait(&mut self, timeout: Duration, events: &mut Vec<Readiness>) -> io::Result<()> {
        events.clear();

        self.pollfds.clear();
        self.pollfds
            .extend(self.armed.iter().map(|&(_, fd)| libc::pollfd {
                fd,
                events: READ_EVENTS,
                revents: 0,
            }));

        if self.pollfds.is_empty() {
            std::thread::sleep(timeout);
            return Ok(());
        }

        // SAFETY: `pollfds` is a live, correctly sized array of pollfd entries.
        let ready = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for (pollfd, &(peer, fd)) in self.pollfds.iter().zip(&self.armed) {
            let revents = pollfd.revents;
            if revents == 0 {
                continue;
            }

            let closed = revents & FAILURE_EVENTS != 0 || at_end_of_stream(fd);
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
