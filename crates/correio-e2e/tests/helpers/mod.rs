#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use correio_core::{MemoryStore, MqConfig};

/// Fresh in-process store for a test.
pub fn test_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Snappy polling config for tests: immediate retries, short pauses.
pub fn test_config() -> MqConfig {
    MqConfig {
        max_retries: 2,
        max_delivery_count: 5,
        retry_after_seconds: 1,
        need_pubsub_ping_seconds: 10,
        pubsub_poll_every_ms: 50,
        first_pubsub_poll_after_ms: 10,
        pubsub_keepalive_every_ms: 50,
        receive_pause_on_no_pending_ms: 20,
    }
}

/// Poll `pred` every few milliseconds until it holds or `timeout` passes.
/// Returns whether the predicate held.
pub fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if pred() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
