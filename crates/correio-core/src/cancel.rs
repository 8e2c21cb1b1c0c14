use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Owner side of a cooperative cancellation signal.
///
/// Built on channel disconnection: cancelling drops the sender half, which
/// every token clone observes at once, including tokens currently parked in
/// [`CancelToken::wait`]. Dropping the source cancels too.
#[derive(Debug)]
pub struct CancelSource {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// A token observing this source. Tokens are cheap to clone and share
    /// across threads.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.rx.clone(),
            _keep: None,
        }
    }

    /// Cancel all tokens. Idempotent.
    pub fn cancel(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation signal checked at poll boundaries. Never interrupts work in
/// flight; consumers observe it between pulls and before sleeping.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
    // Present only on `never()` tokens, where the token itself keeps the
    // channel connected.
    _keep: Option<Sender<()>>,
}

impl CancelToken {
    /// A token that can never fire, for consumers stopped only via their own
    /// lifecycle (`Receiver::stop`).
    pub fn never() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            rx,
            _keep: Some(tx),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Park for `timeout` or until cancelled. Returns true if cancelled.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }
}
