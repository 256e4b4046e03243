//! Receive callbacks.
//!
//! Frames decoded by a background task are handed to a [`Receiver`]. Any
//! `Fn(PeerId, &[u8])` closure is a receiver; [`ChannelReceiver`] forwards
//! frames into a tokio channel for async consumers.
//!
//! # Example
//!
//! ```
//! use socwire::{receiver, PeerId, Receiver};
//!
//! let (rx_side, mut messages) = receiver::channel();
//! rx_side.on_message(PeerId::new(1), b"hello");
//!
//! let message = messages.try_recv().unwrap();
//! assert_eq!(message.peer, PeerId::new(1));
//! assert_eq!(&message.payload[..], b"hello");
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::lock;
use crate::log::ScopedLog;
use crate::peer::PeerId;

/// Consumer of decoded frames.
///
/// Called from the transport's background task. The payload is only valid
/// for the duration of the call; copy it to keep it. Calling `end` on the
/// owning wrapper from inside `on_message` deadlocks. A send from inside
/// `on_message` fails with `TimedOut` once the peer stops reading for the
/// configured I/O timeout, so it cannot hold up `end` indefinitely.
pub trait Receiver: Send + Sync {
    /// Handle one frame from `peer`.
    fn on_message(&self, peer: PeerId, data: &[u8]);
}

impl<F> Receiver for F
where
    F: Fn(PeerId, &[u8]) + Send + Sync,
{
    fn on_message(&self, peer: PeerId, data: &[u8]) {
        self(peer, data)
    }
}

/// One decoded frame, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender (server side) or the connection id (client side).
    pub peer: PeerId,
    /// Frame payload.
    pub payload: Bytes,
}

/// Receiver that forwards every frame into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReceiver {
    tx: mpsc::UnboundedSender<Message>,
}

impl ChannelReceiver {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl Receiver for ChannelReceiver {
    fn on_message(&self, peer: PeerId, data: &[u8]) {
        // A dropped consumer only means nobody is listening anymore.
        let _ = self.tx.send(Message {
            peer,
            payload: Bytes::copy_from_slice(data),
        });
    }
}

/// Create a [`ChannelReceiver`] and the matching message stream.
pub fn channel() -> (ChannelReceiver, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelReceiver::new(tx), rx)
}

/// Lock-protected slot holding the current receiver.
///
/// Installing, clearing and invoking all take the same lock, so once
/// [`clear`](Self::clear) returns no invocation is in flight and none will
/// start.
#[derive(Clone, Default)]
pub(crate) struct ReceiverSlot {
    inner: Arc<Mutex<Option<Arc<dyn Receiver>>>>,
}

impl ReceiverSlot {
    pub(crate) fn set(&self, receiver: Arc<dyn Receiver>) {
        *lock(&self.inner) = Some(receiver);
    }

    pub(crate) fn clear(&self) {
        lock(&self.inner).take();
    }

    /// Invoke the receiver, if any. A panicking receiver is logged and
    /// does not unwind into the caller.
    pub(crate) fn deliver(&self, peer: PeerId, data: &[u8], log: &ScopedLog) {
        let slot = lock(&self.inner);
        let Some(receiver) = slot.as_ref() else {
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| receiver.on_message(peer, data)));
        if result.is_err() {
            log.error(format_args!("receiver panicked on frame from {}", peer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closure_is_receiver() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let receiver = move |_peer: PeerId, data: &[u8]| {
            counter.fetch_add(data.len(), Ordering::SeqCst);
        };

        receiver.on_message(PeerId::new(1), b"abc");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_slot_delivers_until_cleared() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let slot = ReceiverSlot::default();
        slot.set(Arc::new(move |_: PeerId, _: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let log = ScopedLog::default();
        slot.deliver(PeerId::new(1), b"x", &log);
        slot.clear();
        slot.deliver(PeerId::new(1), b"y", &log);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_survives_panicking_receiver() {
        let slot = ReceiverSlot::default();
        slot.set(Arc::new(|_: PeerId, _: &[u8]| panic!("boom")));

        slot.deliver(PeerId::new(2), b"x", &ScopedLog::default());
        // The lock must not be poisoned for later use.
        slot.clear();
    }

    #[tokio::test]
    async fn test_channel_receiver_forwards() {
        let (receiver, mut rx) = channel();
        receiver.on_message(PeerId::new(4), b"one");
        receiver.on_message(PeerId::new(5), b"two");

        assert_eq!(
            rx.recv().await.unwrap(),
            Message {
                peer: PeerId::new(4),
                payload: Bytes::from_static(b"one"),
            }
        );
        assert_eq!(rx.recv().await.unwrap().payload, Bytes::from_static(b"two"));
    }

    #[test]
    fn test_channel_receiver_ignores_closed_consumer() {
        let (receiver, rx) = channel();
        drop(rx);
        receiver.on_message(PeerId::new(1), b"nobody");
    }
}
