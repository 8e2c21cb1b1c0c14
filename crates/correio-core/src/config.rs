use serde::Deserialize;

/// Queueing behavior knobs, deserializable from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqConfig {
    /// Explicit failures a message may accumulate before it is dead-lettered.
    pub max_retries: u32,
    /// Hard ceiling on claims regardless of outcome. Bounds poison messages
    /// that crash a consumer before a failure can be recorded.
    pub max_delivery_count: u32,
    /// Seconds a claimed message stays invisible to other consumers — the
    /// visibility-timeout lease.
    pub retry_after_seconds: u64,
    /// Seconds without a keepalive before a pub/sub subscriber is considered
    /// dead. Must be well above the keepalive period.
    pub need_pubsub_ping_seconds: u64,
    /// Registry monitor sweep period.
    pub pubsub_poll_every_ms: u64,
    /// Delay before the registry monitor's first sweep.
    pub first_pubsub_poll_after_ms: u64,
    /// Keepalive emission period for pub/sub receivers.
    pub pubsub_keepalive_every_ms: u64,
    /// Claim-loop pause while the queue has nothing claimable.
    pub receive_pause_on_no_pending_ms: u64,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delivery_count: 5,
            retry_after_seconds: 2,
            need_pubsub_ping_seconds: 10,
            pubsub_poll_every_ms: 4000,
            first_pubsub_poll_after_ms: 500,
            pubsub_keepalive_every_ms: 2000,
            receive_pause_on_no_pending_ms: 800,
        }
    }
}
