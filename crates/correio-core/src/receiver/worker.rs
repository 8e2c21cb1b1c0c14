use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::cancel::CancelToken;
use crate::message::Message;
use crate::receiver::Receiver;

/// Per-message processing callback shared by all workers in a pool. `Ok`
/// acknowledges the message; `Err` records a failure and leaves it for
/// retry.
pub type Handler = dyn Fn(&Message) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
    + Send
    + Sync;

pub(super) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl Receiver {
    /// Launch `pool_size` concurrent workers, each pulling messages and
    /// dispatching them to `handler`. Workers share no mutable state beyond
    /// the store; the atomic claim makes cross-worker (and cross-process)
    /// locking unnecessary.
    ///
    /// A second call is a no-op, as is a call with an already-cancelled
    /// token. Workers stop at the next poll boundary once `cancel` fires or
    /// [`Receiver::stop`] is called; in-flight handler invocations are never
    /// interrupted.
    pub fn start_receiving<F>(self: &Arc<Self>, pool_size: usize, handler: F, cancel: CancelToken)
    where
        F: Fn(&Message) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        if cancel.is_cancelled() {
            return;
        }

        let Ok(mut slot) = self.pool.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let handler: Arc<Handler> = Arc::new(handler);
        let mut handles = Vec::with_capacity(pool_size);
        for n in 0..pool_size {
            let receiver = Arc::clone(self);
            let handler = Arc::clone(&handler);
            let cancel = cancel.clone();
            let name = format!("correio-worker-{}-{n}", self.queue.collection());
            match thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(receiver, handler, cancel))
            {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(error = %e, "failed to spawn worker thread"),
            }
        }
        info!(queue = %self.queue.name(), workers = handles.len(), "worker pool started");
        *slot = Some(WorkerPool { handles });
    }

    /// Disposal: deactivate the claim loop and join any running workers.
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        let pool = match self.pool.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(pool) = pool {
            for handle in pool.handles {
                if handle.join().is_err() {
                    error!(queue = %self.queue.name(), "worker thread panicked");
                }
            }
            info!(queue = %self.queue.name(), "worker pool stopped");
        }
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.pool
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|pool| pool.handles.len()))
            .unwrap_or(0)
    }
}

fn worker_loop(receiver: Arc<Receiver>, handler: Arc<Handler>, cancel: CancelToken) {
    let pause = Duration::from_millis(receiver.config.receive_pause_on_no_pending_ms);
    loop {
        match receiver.next_message(&cancel) {
            Ok(Some(message)) => match (*handler)(&message) {
                Ok(()) => {
                    if let Err(e) = receiver.acknowledge(&message) {
                        error!(queue = %receiver.queue.name(), id = %message.id, error = %e,
                               "acknowledge failed");
                    }
                }
                Err(err) => {
                    if let Err(e) = receiver.fail(&message, &err) {
                        error!(queue = %receiver.queue.name(), id = %message.id, error = %e,
                               "failure could not be recorded");
                    }
                }
            },
            Ok(None) => {
                debug!(queue = %receiver.queue.name(), "worker stopping");
                break;
            }
            // A worker has no caller to surface claim faults to: log, back
            // off one pause interval, resume unless cancelled.
            Err(e) => {
                error!(queue = %receiver.queue.name(), error = %e, "claim failed");
                if cancel.wait(pause) || !receiver.active.load(Ordering::Acquire) {
                    break;
                }
            }
        }
    }
}
