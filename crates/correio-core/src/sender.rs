use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::message::Message;
use crate::queue::{ensure_queue_indexes, Queue};
use crate::store::Store;

/// Enqueues messages into a named queue.
pub struct Sender {
    store: Arc<dyn Store>,
    queue: Queue,
}

impl Sender {
    /// Bind a sender to `queue_name`, ensuring the collection indexes exist.
    pub fn new(store: Arc<dyn Store>, queue_name: &str) -> Result<Self> {
        let queue = Queue::new(queue_name)?;
        ensure_queue_indexes(store.as_ref(), queue.collection())?;
        Ok(Self { store, queue })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Insert `message`, blocking until the store acknowledges the write.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.send_with(message, true)
    }

    /// Insert `message` with an explicit durability choice: `durable = false`
    /// lets the store acknowledge lazily, trading durability for throughput.
    pub fn send_with(&self, message: &Message, durable: bool) -> Result<()> {
        self.store
            .insert_message(self.queue.collection(), message, durable)?;
        debug!(queue = %self.queue.name(), id = %message.id, "message enqueued");
        Ok(())
    }
}
