use uuid::Uuid;

use crate::error::{MqError, Result};
use crate::store::Store;

/// Physical collection backing the dedicated dead-letter queue. It is an
/// ordinary queue, but exempt from expiry and retry-ceiling routing so its
/// content persists until explicitly handled.
pub const ERROR_QUEUE: &str = "error";

/// Prefix for pub/sub private collections: `pubsub_{queue}_{subscriberId}`.
pub(crate) const PUBSUB_PREFIX: &str = "pubsub_";

/// Temporal/lookup fields every queue collection is indexed on.
pub(crate) const INDEXED_FIELDS: &[&str] =
    &["enqueued_at", "delivered_at", "hold_until", "expire_at", "id"];

/// A logical queue name resolved to its physical collection.
///
/// Logical names may contain `.`, which is a structural separator in document
/// stores; the physical name replaces it with `~`. Collections are created
/// lazily by the store on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    name: String,
    collection: String,
}

impl Queue {
    /// Resolve a point-to-point queue. The logical name must not be blank.
    pub fn new(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(MqError::BlankQueueName);
        }
        Ok(Self {
            name: name.to_string(),
            collection: sanitize(name),
        })
    }

    /// The dedicated error queue.
    pub fn error() -> Self {
        Self {
            name: ERROR_QUEUE.to_string(),
            collection: ERROR_QUEUE.to_string(),
        }
    }

    /// The private queue a pub/sub subscriber drains for this logical queue.
    pub(crate) fn private_for(&self, subscriber_id: Uuid) -> Self {
        Self {
            name: self.name.clone(),
            collection: private_collection(&self.collection, subscriber_id),
        }
    }

    /// The caller-facing logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical collection name in the store.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_error_queue(&self) -> bool {
        self.collection == ERROR_QUEUE
    }
}

fn sanitize(name: &str) -> String {
    name.replace('.', "~")
}

/// `pubsub_{queue}_{subscriberId}`
pub(crate) fn private_collection(queue: &str, subscriber_id: Uuid) -> String {
    format!("{PUBSUB_PREFIX}{queue}_{subscriber_id}")
}

/// Parse a private collection name back into its queue and subscriber parts.
/// Returns `None` for collections that don't follow the naming scheme.
pub(crate) fn parse_private_collection(collection: &str) -> Option<(&str, Uuid)> {
    let rest = collection.strip_prefix(PUBSUB_PREFIX)?;
    let (queue, id) = rest.rsplit_once('_')?;
    if queue.is_empty() {
        return None;
    }
    let subscriber_id = Uuid::parse_str(id).ok()?;
    Some((queue, subscriber_id))
}

pub(crate) fn ensure_queue_indexes(store: &dyn Store, collection: &str) -> Result<()> {
    for field in INDEXED_FIELDS {
        store.ensure_index(collection, field)?;
    }
    Ok(())
}
