use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::message::Message;
use crate::pubsub::registry::SubscriberRegistry;
use crate::queue::{private_collection, Queue};
use crate::store::Store;

/// Broadcast sender: one copy of each message per currently-live subscriber.
///
/// Fan-out consults the registry's in-memory view at call time. A subscriber
/// registered after a send sees nothing for it; one whose keepalive just
/// lapsed may receive a copy that sits unconsumed until its queue is GC'd.
pub struct PubSubSender {
    store: Arc<dyn Store>,
    registry: Arc<SubscriberRegistry>,
    queue: Queue,
}

impl PubSubSender {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SubscriberRegistry>,
        queue_name: &str,
    ) -> Result<Self> {
        let queue = Queue::new(queue_name)?;
        Ok(Self {
            store,
            registry,
            queue,
        })
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Insert one durable copy of `message` into each live subscriber's
    /// private queue. Returns the number of copies written.
    pub fn send(&self, message: &Message) -> Result<usize> {
        self.send_with(message, true)
    }

    pub fn send_with(&self, message: &Message, durable: bool) -> Result<usize> {
        let subscribers = self.registry.subscribers(self.queue.collection());
        for subscriber_id in &subscribers {
            let collection = private_collection(self.queue.collection(), *subscriber_id);
            self.store.insert_message(&collection, message, durable)?;
        }
        debug!(queue = %self.queue.name(), copies = subscribers.len(), id = %message.id,
               "message distributed");
        Ok(subscribers.len())
    }
}
