use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::properties::Properties;

/// Milliseconds since the Unix epoch. All lifecycle timestamps use this.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One recorded processing failure: when it happened and what went wrong.
/// The `errors` log on a message is append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageError {
    pub at: u64,
    pub error: String,
}

impl MessageError {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            at: now_ms(),
            error: error.into(),
        }
    }
}

/// The unit of work transported end to end. Created by a `Sender`, mutated by
/// the claim protocol (lease stamp, counters, error log), removed on
/// acknowledge, expiry or dead-lettering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique for the lifetime of a queue; never reused once removed.
    pub id: Uuid,
    pub correlation_id: Option<Uuid>,
    /// Creation time; claims go oldest-first by this field.
    pub enqueued_at: u64,
    /// Lease marker: time of the most recent claim. Zero means never
    /// delivered, so a fresh message is immediately claimable.
    pub delivered_at: u64,
    /// Attempts that ended in an explicitly reported failure.
    pub retry_count: u32,
    /// Claims regardless of outcome. Always >= `retry_count`.
    pub delivery_count: u32,
    /// Free-form classification.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub properties: Properties,
    pub errors: Vec<MessageError>,
    pub reply_to: Option<String>,
    pub text: Option<String>,
    /// Physical name of the queue a dead-lettered message came from.
    pub original_queue: Option<String>,
    /// Absolute deadline after which the message is discarded unprocessed.
    pub expire_at: Option<u64>,
    /// The message is not claimable before this time (delay/scheduling).
    pub hold_until: Option<u64>,
}

impl Message {
    /// Time-to-live stamped on fresh messages: 7 days.
    pub const DEFAULT_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

    pub fn new() -> Self {
        let now = now_ms();
        Self {
            id: Uuid::now_v7(),
            correlation_id: None,
            enqueued_at: now,
            delivered_at: 0,
            retry_count: 0,
            delivery_count: 0,
            kind: None,
            properties: Properties::new(),
            errors: Vec::new(),
            reply_to: None,
            text: None,
            original_queue: None,
            expire_at: Some(now + Self::DEFAULT_TTL_MS),
            hold_until: None,
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        let mut message = Self::new();
        message.text = Some(text.into());
        message
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expire_at.is_some_and(|at| at < now)
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}
