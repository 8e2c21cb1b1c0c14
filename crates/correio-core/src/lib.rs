//! Durable message queues over an atomic document store.
//!
//! Point-to-point queues with visibility-timeout leases, bounded retries and
//! dead-lettering, plus a broadcast mode with a self-healing subscriber
//! registry (keepalive, expiry, orphan recovery). Delivery is at-least-once;
//! idempotency is the consumer's concern.
//!
//! Claim exclusivity rests on a single store capability: an atomic
//! find-sort-update-return of one document ([`Store::claim_next`]). No lock
//! is shared between workers or processes.

pub mod cancel;
pub mod config;
pub mod error;
pub mod message;
pub mod properties;
pub mod pubsub;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod store;
pub mod telemetry;

pub use cancel::{CancelSource, CancelToken};
pub use config::MqConfig;
pub use error::{MqError, Result, StoreError, StoreResult};
pub use message::{Message, MessageError};
pub use properties::{Properties, PropertyValue};
pub use pubsub::{PubSubReceiver, PubSubSender, RegistryMonitor, SubscriberRegistry};
pub use queue::{Queue, ERROR_QUEUE};
pub use receiver::{Handler, Messages, Receiver};
pub use sender::Sender;
pub use store::{MemoryStore, Store, Subscription};
