use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::message::{Message, MessageError};
use crate::store::traits::{Store, Subscription};

/// In-process store backend: collections of JSON documents under one mutex,
/// which makes every operation — `claim_next` in particular — linearizable
/// per document. Messages round-trip through serde on insert and claim, so
/// the real wire encoding is always exercised.
///
/// The `durable` insert flag is accepted and ignored: an in-memory write is
/// already as durable as this backend gets.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: BTreeMap<String, Vec<Value>>,
    indexes: BTreeMap<String, BTreeSet<String>>,
    subscriptions: Vec<Subscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Indexed fields recorded for a collection. Test introspection.
    pub fn indexed_fields(&self, collection: &str) -> Vec<String> {
        self.lock()
            .map(|inner| {
                inner
                    .indexes
                    .get(collection)
                    .map(|fields| fields.iter().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn doc_u64(doc: &Value, field: &str) -> Option<u64> {
    doc.get(field)?.as_u64()
}

fn doc_has_id(doc: &Value, id: Uuid) -> bool {
    doc.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .is_some_and(|doc_id| doc_id == id)
}

impl Store for MemoryStore {
    fn collection_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.collections.keys().cloned().collect())
    }

    fn drop_collection(&self, collection: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.collections.remove(collection);
        inner.indexes.remove(collection);
        Ok(())
    }

    fn ensure_index(&self, collection: &str, field: &str) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.collections.entry(collection.to_string()).or_default();
        inner
            .indexes
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string());
        Ok(())
    }

    fn insert_message(
        &self,
        collection: &str,
        message: &Message,
        _durable: bool,
    ) -> StoreResult<()> {
        let doc = serde_json::to_value(message)?;
        self.lock()?
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(())
    }

    fn delete_message(&self, collection: &str, id: Uuid) -> StoreResult<()> {
        if let Some(docs) = self.lock()?.collections.get_mut(collection) {
            docs.retain(|doc| !doc_has_id(doc, id));
        }
        Ok(())
    }

    fn claim_next(
        &self,
        collection: &str,
        delivered_before: u64,
        now: u64,
    ) -> StoreResult<Option<Message>> {
        let mut inner = self.lock()?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(None);
        };

        let mut best: Option<(usize, u64)> = None;
        for (idx, doc) in docs.iter().enumerate() {
            if doc_u64(doc, "delivered_at").unwrap_or(0) > delivered_before {
                continue;
            }
            let held = match doc.get("hold_until") {
                None | Some(Value::Null) => false,
                Some(hold) => hold.as_u64().is_some_and(|until| until >= now),
            };
            if held {
                continue;
            }
            let enqueued_at = doc_u64(doc, "enqueued_at").unwrap_or(0);
            if best.map_or(true, |(_, oldest)| enqueued_at < oldest) {
                best = Some((idx, enqueued_at));
            }
        }

        let Some((idx, _)) = best else {
            return Ok(None);
        };
        docs[idx]["delivered_at"] = Value::from(now);
        let message: Message = serde_json::from_value(docs[idx].clone())?;
        Ok(Some(message))
    }

    fn increment_delivery_count(&self, collection: &str, id: Uuid) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if let Some(docs) = inner.collections.get_mut(collection) {
            if let Some(doc) = docs.iter_mut().find(|doc| doc_has_id(doc, id)) {
                let count = doc_u64(doc, "delivery_count").unwrap_or(0);
                doc["delivery_count"] = Value::from(count + 1);
            }
        }
        Ok(())
    }

    fn record_failure(
        &self,
        collection: &str,
        id: Uuid,
        error: &MessageError,
    ) -> StoreResult<()> {
        let entry = serde_json::to_value(error)?;
        let mut inner = self.lock()?;
        if let Some(docs) = inner.collections.get_mut(collection) {
            if let Some(doc) = docs.iter_mut().find(|doc| doc_has_id(doc, id)) {
                let count = doc_u64(doc, "retry_count").unwrap_or(0);
                doc["retry_count"] = Value::from(count + 1);
                match doc.get_mut("errors") {
                    Some(Value::Array(errors)) => errors.push(entry),
                    _ => doc["errors"] = Value::from(vec![entry]),
                }
            }
        }
        Ok(())
    }

    fn count_messages(&self, collection: &str) -> StoreResult<u64> {
        Ok(self
            .lock()?
            .collections
            .get(collection)
            .map(|docs| docs.len() as u64)
            .unwrap_or(0))
    }

    fn upsert_subscription(&self, subscription: &Subscription) -> StoreResult<()> {
        let mut inner = self.lock()?;
        match inner.subscriptions.iter_mut().find(|sub| {
            sub.queue == subscription.queue && sub.subscriber_id == subscription.subscriber_id
        }) {
            Some(existing) => *existing = subscription.clone(),
            None => inner.subscriptions.push(subscription.clone()),
        }
        Ok(())
    }

    fn list_subscriptions(&self) -> StoreResult<Vec<Subscription>> {
        Ok(self.lock()?.subscriptions.clone())
    }

    fn remove_subscription(&self, queue: &str, subscriber_id: Uuid) -> StoreResult<()> {
        self.lock()?
            .subscriptions
            .retain(|sub| !(sub.queue == queue && sub.subscriber_id == subscriber_id));
        Ok(())
    }
}
