use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::message::{Message, MessageError};

/// A pub/sub subscriber's durable registration: the shared record that lets
/// any process rediscover live subscribers after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    /// Physical name of the logical pub/sub queue.
    pub queue: String,
    pub subscriber_id: Uuid,
    /// Unix millis of the most recent keepalive.
    pub last_keepalive_at: u64,
}

/// The atomic document-store capability every queue component consumes.
///
/// Implementations must be thread-safe, and `claim_next` must be linearizable
/// per document: it is the sole writer of the lease field and the only
/// concurrency primitive the delivery protocol relies on. Collections are
/// created lazily on first use.
pub trait Store: Send + Sync {
    // --- Collection lifecycle ---

    /// Names of all existing collections.
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// Drop a collection and its contents. Missing collections are a no-op.
    fn drop_collection(&self, collection: &str) -> StoreResult<()>;

    /// Idempotently ensure an index on `field` exists for `collection`.
    fn ensure_index(&self, collection: &str, field: &str) -> StoreResult<()>;

    // --- Message operations ---

    /// Insert a message. With `durable` the call must not return before the
    /// backend acknowledges the write; without it the backend may
    /// acknowledge lazily (fire-and-forget).
    fn insert_message(&self, collection: &str, message: &Message, durable: bool)
        -> StoreResult<()>;

    /// Delete a message by id. Deleting an absent id is not an error.
    fn delete_message(&self, collection: &str, id: Uuid) -> StoreResult<()>;

    /// Atomically claim the next deliverable message: among documents with
    /// `delivered_at <= delivered_before` and `hold_until` unset or `< now`,
    /// take the oldest by `enqueued_at`, set its `delivered_at = now`, and
    /// return the updated document. `None` means nothing is claimable right
    /// now — an empty result, never an error.
    fn claim_next(
        &self,
        collection: &str,
        delivered_before: u64,
        now: u64,
    ) -> StoreResult<Option<Message>>;

    /// Increment a message's `delivery_count` by one. Absent ids are a no-op.
    fn increment_delivery_count(&self, collection: &str, id: Uuid) -> StoreResult<()>;

    /// Increment a message's `retry_count` by one and append `error` to its
    /// `errors` log. Absent ids are a no-op.
    fn record_failure(
        &self,
        collection: &str,
        id: Uuid,
        error: &MessageError,
    ) -> StoreResult<()>;

    /// Number of documents currently in the collection. Approximate with
    /// respect to concurrent claims.
    fn count_messages(&self, collection: &str) -> StoreResult<u64>;

    // --- Subscriber registry ---

    /// Insert or refresh a durable subscriber registration.
    fn upsert_subscription(&self, subscription: &Subscription) -> StoreResult<()>;

    /// All durable subscriber registrations.
    fn list_subscriptions(&self) -> StoreResult<Vec<Subscription>>;

    /// Remove a durable subscriber registration. Absent entries are a no-op.
    fn remove_subscription(&self, queue: &str, subscriber_id: Uuid) -> StoreResult<()>;
}
