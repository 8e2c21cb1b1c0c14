use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelSource;
use crate::config::MqConfig;
use crate::error::Result;
use crate::message::now_ms;
use crate::queue::{parse_private_collection, private_collection};
use crate::store::{Store, Subscription};

/// Tracks live pub/sub subscribers per logical queue.
///
/// Two views are kept consistent under one mutex: an in-memory map — the fast
/// path consulted on every fan-out send — and the durable registration
/// records in the store, the source of truth that survives restarts. Every
/// mutation (keepalive, orphan discovery, monitor sweep) holds the mutex
/// across its paired in-memory and durable writes.
pub struct SubscriberRegistry {
    store: Arc<dyn Store>,
    inner: Mutex<HashMap<String, HashMap<Uuid, u64>>>,
}

impl SubscriberRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<Uuid, u64>>> {
        // A poisoned registry map is still structurally valid; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Orphan recovery: rebuild in-memory knowledge from private collections
    /// that already exist in the store (left behind by a crash or created by
    /// another process). Recovered entries carry a zero keepalive stamp, so
    /// the monitor collects them unless their subscriber turns out to be
    /// alive and pings again.
    pub fn discover_existing(&self) -> Result<()> {
        let names = self.store.collection_names()?;
        let mut inner = self.lock();
        let mut found = 0usize;
        for name in &names {
            if let Some((queue, subscriber_id)) = parse_private_collection(name) {
                inner
                    .entry(queue.to_string())
                    .or_default()
                    .entry(subscriber_id)
                    .or_insert(0);
                found += 1;
            }
        }
        if found > 0 {
            debug!(subscribers = found, "recovered pre-existing subscriber queues");
        }
        Ok(())
    }

    /// Refresh a subscriber's liveness, in memory and in the durable record.
    pub fn keep_alive(&self, queue: &str, subscriber_id: Uuid) -> Result<()> {
        let now = now_ms();
        let mut inner = self.lock();
        inner
            .entry(queue.to_string())
            .or_default()
            .insert(subscriber_id, now);
        self.store.upsert_subscription(&Subscription {
            queue: queue.to_string(),
            subscriber_id,
            last_keepalive_at: now,
        })?;
        Ok(())
    }

    /// Snapshot of the currently-known subscriber ids for a queue — the
    /// fan-out path.
    pub fn subscribers(&self, queue: &str) -> Vec<Uuid> {
        self.lock()
            .get(queue)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Expire every subscriber whose last keepalive is older than `ttl`.
    /// Durable record, private collection, and in-memory entry go in the same
    /// critical section, so a dead subscriber's queue never lingers to
    /// accumulate unconsumed messages. Live durable entries refresh the
    /// in-memory view (another process's keepalives become visible here).
    /// Returns the number of subscribers removed.
    pub fn sweep(&self, ttl: Duration) -> Result<usize> {
        let now = now_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let mut inner = self.lock();
        let mut expired = 0usize;

        for sub in self.store.list_subscriptions()? {
            if now.saturating_sub(sub.last_keepalive_at) > ttl_ms {
                self.store
                    .remove_subscription(&sub.queue, sub.subscriber_id)?;
                self.store
                    .drop_collection(&private_collection(&sub.queue, sub.subscriber_id))?;
                if let Some(subs) = inner.get_mut(&sub.queue) {
                    subs.remove(&sub.subscriber_id);
                }
                info!(queue = %sub.queue, subscriber = %sub.subscriber_id,
                      "expired subscriber removed");
                expired += 1;
            } else {
                inner
                    .entry(sub.queue.clone())
                    .or_default()
                    .entry(sub.subscriber_id)
                    .and_modify(|at| *at = (*at).max(sub.last_keepalive_at))
                    .or_insert(sub.last_keepalive_at);
            }
        }

        // In-memory entries with no durable record — recovered orphans —
        // expire the same way.
        for (queue, subs) in inner.iter_mut() {
            let stale: Vec<Uuid> = subs
                .iter()
                .filter(|(_, &at)| now.saturating_sub(at) > ttl_ms)
                .map(|(id, _)| *id)
                .collect();
            for subscriber_id in stale {
                subs.remove(&subscriber_id);
                self.store
                    .drop_collection(&private_collection(queue, subscriber_id))?;
                info!(queue = %queue, subscriber = %subscriber_id,
                      "orphaned subscriber queue dropped");
                expired += 1;
            }
        }
        inner.retain(|_, subs| !subs.is_empty());

        Ok(expired)
    }
}

/// Background GC for the subscriber registry: one explicit instance per
/// process with its own thread and lifecycle, constructed at startup and
/// stopped (or dropped) at shutdown. A dedicated thread cannot re-enter its
/// own tick, so overlapping sweeps are impossible by construction.
pub struct RegistryMonitor {
    cancel: CancelSource,
    handle: Option<JoinHandle<()>>,
}

impl RegistryMonitor {
    /// Spawn the monitor thread. Orphan discovery runs once at startup; the
    /// first sweep follows after `first_pubsub_poll_after_ms`, then every
    /// `pubsub_poll_every_ms`. A subscriber is expired once it has gone
    /// `need_pubsub_ping_seconds` without a keepalive.
    pub fn start(registry: Arc<SubscriberRegistry>, config: &MqConfig) -> Self {
        let cancel = CancelSource::new();
        let token = cancel.token();
        let first = Duration::from_millis(config.first_pubsub_poll_after_ms);
        let every = Duration::from_millis(config.pubsub_poll_every_ms);
        let ttl = Duration::from_secs(config.need_pubsub_ping_seconds);

        let spawned = thread::Builder::new()
            .name("correio-registry-monitor".to_string())
            .spawn(move || {
                info!("registry monitor started");
                if let Err(e) = registry.discover_existing() {
                    warn!(error = %e, "orphan discovery failed");
                }
                let mut wait = first;
                loop {
                    if token.wait(wait) {
                        break;
                    }
                    wait = every;
                    match registry.sweep(ttl) {
                        Ok(0) => {}
                        Ok(expired) => debug!(expired, "registry sweep complete"),
                        Err(e) => warn!(error = %e, "registry sweep failed"),
                    }
                }
                info!("registry monitor stopped");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to spawn registry monitor thread");
                None
            }
        };

        Self { cancel, handle }
    }

    /// Stop the monitor and wait for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RegistryMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, SubscriberRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = SubscriberRegistry::new(store.clone() as Arc<dyn Store>);
        (store, registry)
    }

    #[test]
    fn keep_alive_updates_both_views() {
        let (store, registry) = setup();
        let id = Uuid::new_v4();

        registry.keep_alive("ticks", id).unwrap();

        assert_eq!(registry.subscribers("ticks"), vec![id]);
        let durable = store.list_subscriptions().unwrap();
        assert_eq!(durable.len(), 1);
        assert_eq!(durable[0].subscriber_id, id);
        assert!(durable[0].last_keepalive_at > 0);
    }

    #[test]
    fn discovers_existing_private_collections() {
        let (store, registry) = setup();
        let id = Uuid::new_v4();
        store
            .insert_message(
                &private_collection("ticks", id),
                &Message::with_text("orphan"),
                true,
            )
            .unwrap();
        store.ensure_index("not-a-private-queue", "id").unwrap();

        registry.discover_existing().unwrap();

        assert_eq!(registry.subscribers("ticks"), vec![id]);
        assert!(registry.subscribers("not-a-private-queue").is_empty());
    }

    #[test]
    fn sweep_expires_stale_durable_subscribers() {
        let (store, registry) = setup();
        let id = Uuid::new_v4();
        registry.keep_alive("ticks", id).unwrap();
        store
            .insert_message(
                &private_collection("ticks", id),
                &Message::with_text("unconsumed"),
                true,
            )
            .unwrap();

        // Nothing is stale under a generous ttl
        assert_eq!(registry.sweep(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(registry.subscribers("ticks"), vec![id]);

        // With a zero ttl everything is stale: durable record, collection and
        // in-memory entry all go. (Step past the keepalive's millisecond
        // first, so `now - last > 0` holds.)
        thread::sleep(Duration::from_millis(5));
        assert_eq!(registry.sweep(Duration::ZERO).unwrap(), 1);
        assert!(registry.subscribers("ticks").is_empty());
        assert!(store.list_subscriptions().unwrap().is_empty());
        assert!(!store
            .collection_names()
            .unwrap()
            .contains(&private_collection("ticks", id)));
    }

    #[test]
    fn sweep_collects_recovered_orphans() {
        let (store, registry) = setup();
        let id = Uuid::new_v4();
        store
            .insert_message(
                &private_collection("ticks", id),
                &Message::with_text("orphan"),
                true,
            )
            .unwrap();

        registry.discover_existing().unwrap();
        assert_eq!(registry.subscribers("ticks"), vec![id]);

        // No durable record exists; the in-memory sweep still drops the queue
        assert_eq!(registry.sweep(Duration::from_secs(3600)).unwrap(), 1);
        assert!(registry.subscribers("ticks").is_empty());
        assert!(store.collection_names().unwrap().is_empty());
    }

    #[test]
    fn sweep_adopts_foreign_keepalives() {
        let (store, registry) = setup();
        let id = Uuid::new_v4();
        // Simulates a keepalive written by another process
        store
            .upsert_subscription(&Subscription {
                queue: "ticks".to_string(),
                subscriber_id: id,
                last_keepalive_at: now_ms(),
            })
            .unwrap();

        assert!(registry.subscribers("ticks").is_empty());
        registry.sweep(Duration::from_secs(3600)).unwrap();
        assert_eq!(registry.subscribers("ticks"), vec![id]);
    }

    #[test]
    fn monitor_runs_sweeps_until_stopped() {
        let (store, _) = setup();
        let registry = Arc::new(SubscriberRegistry::new(store.clone() as Arc<dyn Store>));
        let id = Uuid::new_v4();
        store
            .insert_message(
                &private_collection("ticks", id),
                &Message::with_text("orphan"),
                true,
            )
            .unwrap();
        registry.discover_existing().unwrap();

        let config = MqConfig {
            first_pubsub_poll_after_ms: 10,
            pubsub_poll_every_ms: 10,
            need_pubsub_ping_seconds: 0,
            ..MqConfig::default()
        };
        let monitor = RegistryMonitor::start(Arc::clone(&registry), &config);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !registry.subscribers("ticks").is_empty() {
            assert!(std::time::Instant::now() < deadline, "monitor never swept");
            thread::sleep(Duration::from_millis(5));
        }
        monitor.stop();
        assert!(store.collection_names().unwrap().is_empty());
    }
}
