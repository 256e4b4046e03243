//! Dedicated background thread with cooperative cancellation.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A named OS thread that runs until its body returns.
///
/// The body receives a [`CancellationToken`] and is expected to check it
/// at least once per bounded wait.
pub(crate) struct BackgroundTask {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub(crate) fn spawn<F>(name: &str, body: F) -> io::Result<Self>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))?;
        Ok(Self {
            cancel,
            thread: Some(thread),
        })
    }

    /// Whether the body has returned on its own or after a stop request.
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Request cancellation and wait for the body to return.
    ///
    /// Must not be called from the body's own thread.
    pub(crate) fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep up to `duration`, returning early once `cancel` fires.
pub(crate) fn sleep_unless_cancelled(cancel: &CancellationToken, duration: Duration) {
    const SLICE: Duration = Duration::from_millis(10);
    let mut left = duration;
    while !left.is_zero() && !cancel.is_cancelled() {
        let step = left.min(SLICE);
        thread::sleep(step);
        left -= step;
    }
}
