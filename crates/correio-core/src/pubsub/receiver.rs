use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cancel::{CancelSource, CancelToken};
use crate::config::MqConfig;
use crate::error::Result;
use crate::message::Message;
use crate::pubsub::registry::SubscriberRegistry;
use crate::queue::Queue;
use crate::receiver::{Messages, Receiver};
use crate::store::Store;

/// A broadcast subscriber: an ordinary receiver bound to a freshly-derived
/// private queue, kept live in the registry by a periodic keepalive thread.
///
/// Construction registers the subscriber immediately, so fan-out sends reach
/// it before its first poll. Stopping (or dropping) halts the keepalive and
/// the worker pool; the registration itself is left to lapse, and the
/// monitor reclaims the private queue once the liveness threshold passes.
pub struct PubSubReceiver {
    receiver: Arc<Receiver>,
    registry: Arc<SubscriberRegistry>,
    queue: String,
    subscriber_id: Uuid,
    keepalive_cancel: CancelSource,
    keepalive: Option<JoinHandle<()>>,
}

impl PubSubReceiver {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SubscriberRegistry>,
        queue_name: &str,
        config: MqConfig,
    ) -> Result<Self> {
        let subscriber_id = Uuid::new_v4();
        let base = Queue::new(queue_name)?;
        let private = base.private_for(subscriber_id);
        let keepalive_every = Duration::from_millis(config.pubsub_keepalive_every_ms);

        // Live in the registry before the first poll
        registry.keep_alive(base.collection(), subscriber_id)?;

        let receiver = Arc::new(Receiver::for_queue(store, private, config)?);

        let keepalive_cancel = CancelSource::new();
        let token = keepalive_cancel.token();
        let keepalive_registry = Arc::clone(&registry);
        let keepalive_queue = base.collection().to_string();
        let spawned = thread::Builder::new()
            .name(format!("correio-keepalive-{}", base.collection()))
            .spawn(move || {
                while !token.wait(keepalive_every) {
                    if let Err(e) = keepalive_registry.keep_alive(&keepalive_queue, subscriber_id)
                    {
                        warn!(queue = %keepalive_queue, subscriber = %subscriber_id,
                              error = %e, "keepalive failed");
                    }
                }
                debug!(queue = %keepalive_queue, subscriber = %subscriber_id,
                       "keepalive stopped");
            });
        let keepalive = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn keepalive thread");
                None
            }
        };

        Ok(Self {
            receiver,
            registry,
            queue: base.collection().to_string(),
            subscriber_id,
            keepalive_cancel,
            keepalive,
        })
    }

    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    /// The private queue this subscriber drains.
    pub fn queue(&self) -> &Queue {
        self.receiver.queue()
    }

    /// Refresh this subscriber's registration immediately, outside the
    /// periodic schedule.
    pub fn keep_alive(&self) -> Result<()> {
        self.registry.keep_alive(&self.queue, self.subscriber_id)
    }

    pub fn receive<'a>(&'a self, cancel: &'a CancelToken) -> Messages<'a> {
        self.receiver.receive(cancel)
    }

    pub fn next_message(&self, cancel: &CancelToken) -> Result<Option<Message>> {
        self.receiver.next_message(cancel)
    }

    pub fn start_receiving<F>(&self, pool_size: usize, handler: F, cancel: CancelToken)
    where
        F: Fn(&Message) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.receiver.start_receiving(pool_size, handler, cancel);
    }

    pub fn acknowledge(&self, message: &Message) -> Result<()> {
        self.receiver.acknowledge(message)
    }

    pub fn fail(&self, message: &Message, error: impl std::fmt::Display) -> Result<()> {
        self.receiver.fail(message, error)
    }

    pub fn count_pending(&self) -> Result<u64> {
        self.receiver.count_pending()
    }

    /// Disposal: halt the keepalive thread and the embedded receiver. Safe to
    /// call more than once; also runs on drop.
    pub fn stop(&mut self) {
        self.keepalive_cancel.cancel();
        if let Some(handle) = self.keepalive.take() {
            let _ = handle.join();
        }
        self.receiver.stop();
    }
}

impl Drop for PubSubReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_config() -> MqConfig {
        MqConfig {
            retry_after_seconds: 0,
            receive_pause_on_no_pending_ms: 10,
            pubsub_keepalive_every_ms: 20,
            ..MqConfig::default()
        }
    }

    #[test]
    fn construction_registers_the_subscriber() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>));

        let receiver =
            PubSubReceiver::new(store.clone(), Arc::clone(&registry), "ticks", test_config())
                .unwrap();

        assert_eq!(registry.subscribers("ticks"), vec![receiver.subscriber_id()]);
        let durable = store.list_subscriptions().unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].queue, "ticks");
    }

    #[test]
    fn keepalive_thread_refreshes_the_stamp() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>));
        let _receiver =
            PubSubReceiver::new(store.clone(), registry, "ticks", test_config()).unwrap();

        let initial = store.list_subscriptions().unwrap()[0].last_keepalive_at;
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = store.list_subscriptions().unwrap()[0].last_keepalive_at;
            if current > initial {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "keepalive never refreshed"
            );
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn drains_its_private_queue() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>));
        let receiver =
            PubSubReceiver::new(store.clone(), registry, "ticks", test_config()).unwrap();

        store
            .insert_message(
                receiver.queue().collection(),
                &Message::with_text("private"),
                true,
            )
            .unwrap();

        assert_eq!(receiver.count_pending().unwrap(), 1);
        let claimed = receiver.next_message(&CancelToken::never()).unwrap().unwrap();
        assert_eq!(claimed.text.as_deref(), Some("private"));
        receiver.acknowledge(&claimed).unwrap();
        assert_eq!(receiver.count_pending().unwrap(), 0);
    }

    #[test]
    fn stop_is_reentrant() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>));
        let mut receiver =
            PubSubReceiver::new(store, registry, "ticks", test_config()).unwrap();
        receiver.stop();
        receiver.stop();
    }
}
