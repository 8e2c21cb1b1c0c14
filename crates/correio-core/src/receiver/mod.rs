use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::MqConfig;
use crate::error::Result;
use crate::message::{now_ms, Message, MessageError};
use crate::queue::{ensure_queue_indexes, Queue, ERROR_QUEUE};
use crate::store::Store;

mod worker;

pub use worker::Handler;
use worker::WorkerPool;

/// Claims messages from a queue, driving the retry / expiry / dead-letter
/// lifecycle. Any number of receivers (in any number of processes) may poll
/// the same queue; exclusivity rests entirely on the store's atomic claim,
/// which turns `delivered_at` into a visibility-timeout lease.
pub struct Receiver {
    store: Arc<dyn Store>,
    queue: Queue,
    config: MqConfig,
    active: AtomicBool,
    pool: Mutex<Option<WorkerPool>>,
}

impl Receiver {
    pub fn new(store: Arc<dyn Store>, queue_name: &str, config: MqConfig) -> Result<Self> {
        let queue = Queue::new(queue_name)?;
        Self::for_queue(store, queue, config)
    }

    /// Bind to an already-resolved queue (the error queue, pub/sub private
    /// queues).
    pub(crate) fn for_queue(
        store: Arc<dyn Store>,
        queue: Queue,
        config: MqConfig,
    ) -> Result<Self> {
        ensure_queue_indexes(store.as_ref(), queue.collection())?;
        if !queue.is_error_queue() {
            ensure_queue_indexes(store.as_ref(), ERROR_QUEUE)?;
        }
        Ok(Self {
            store,
            queue,
            config,
            active: AtomicBool::new(true),
            pool: Mutex::new(None),
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Lazy, restartable stream of claimed messages. Each pull blocks until a
    /// message is available, `cancel` fires, or the receiver is stopped.
    /// Store faults surface as `Err` items; the stream stays usable after
    /// one.
    pub fn receive<'a>(&'a self, cancel: &'a CancelToken) -> Messages<'a> {
        Messages {
            receiver: self,
            cancel,
        }
    }

    /// One pull of the claim loop. Returns `Ok(None)` when `cancel` fires or
    /// the receiver is stopped, never on an empty queue — an empty queue
    /// parks and retries.
    pub fn next_message(&self, cancel: &CancelToken) -> Result<Option<Message>> {
        let pause = Duration::from_millis(self.config.receive_pause_on_no_pending_ms);
        loop {
            if !self.active.load(Ordering::Acquire) || cancel.is_cancelled() {
                return Ok(None);
            }

            let now = now_ms();
            let delivered_before = now.saturating_sub(self.config.retry_after_seconds * 1000);
            let claimed = self
                .store
                .claim_next(self.queue.collection(), delivered_before, now)?;

            let Some(mut message) = claimed else {
                if cancel.wait(pause) {
                    return Ok(None);
                }
                continue;
            };

            // The error queue keeps its content until explicitly handled: no
            // expiry, no dead-letter routing.
            if !self.queue.is_error_queue() {
                if message.is_expired(now) {
                    debug!(queue = %self.queue.name(), id = %message.id, "expired message discarded");
                    self.acknowledge(&message)?;
                    continue;
                }
                if message.retry_count >= self.config.max_retries {
                    self.move_to_error_queue(&message)?;
                    continue;
                }
            }

            // Poison guard: claimed too often without a recorded failure.
            // Applies everywhere, the error queue included.
            if message.delivery_count > self.config.max_delivery_count {
                warn!(queue = %self.queue.name(), id = %message.id,
                      delivery_count = message.delivery_count,
                      "delivery ceiling exceeded, discarding");
                self.acknowledge(&message)?;
                continue;
            }

            self.store
                .increment_delivery_count(self.queue.collection(), message.id)?;
            message.delivery_count += 1;
            debug!(queue = %self.queue.name(), id = %message.id,
                   delivery_count = message.delivery_count, "message claimed");
            return Ok(Some(message));
        }
    }

    /// Remove a processed message. Deleting an already-absent id is not an
    /// error.
    pub fn acknowledge(&self, message: &Message) -> Result<()> {
        self.store
            .delete_message(self.queue.collection(), message.id)?;
        Ok(())
    }

    /// Record a processing failure and leave the message in place; it becomes
    /// claimable again once its lease lapses (`retry_after_seconds`).
    pub fn fail(&self, message: &Message, error: impl std::fmt::Display) -> Result<()> {
        let entry = MessageError::new(error.to_string());
        debug!(queue = %self.queue.name(), id = %message.id, error = %entry.error,
               "message failed, left for retry");
        self.store
            .record_failure(self.queue.collection(), message.id, &entry)?;
        Ok(())
    }

    /// Number of documents currently in the queue. Approximate under
    /// concurrent claims — fine for monitoring, not for flow control.
    pub fn count_pending(&self) -> Result<u64> {
        Ok(self.store.count_messages(self.queue.collection())?)
    }

    /// Dead-letter: remove from the source queue and insert a copy into the
    /// error queue, stamped with its origin. Lease state and both counters
    /// are reset so a processed error queue cannot immediately re-dead-letter
    /// the message; the error log is preserved for diagnosis.
    fn move_to_error_queue(&self, message: &Message) -> Result<()> {
        self.store
            .delete_message(self.queue.collection(), message.id)?;

        let mut dead = message.clone();
        dead.original_queue = Some(self.queue.collection().to_string());
        dead.delivered_at = 0;
        dead.retry_count = 0;
        dead.delivery_count = 0;

        self.store.insert_message(ERROR_QUEUE, &dead, true)?;
        info!(queue = %self.queue.name(), id = %message.id,
              errors = dead.errors.len(), "message dead-lettered");
        Ok(())
    }
}

/// Iterator over claimed messages; see [`Receiver::receive`].
pub struct Messages<'a> {
    receiver: &'a Receiver,
    cancel: &'a CancelToken,
}

impl Iterator for Messages<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.next_message(self.cancel).transpose()
    }
}
