//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Defaults ────────────────────────────────────────────────────────

/// Client-side bound on one long-poll. Slightly above the service's hold
/// time so a healthy empty answer arrives first.
pub const DEFAULT_SUBSCRIBE_TIMEOUT_MS: u64 = 310_000;

/// Presence timeout announced with every poll, in seconds.
pub const DEFAULT_PRESENCE_TIMEOUT_SECS: u32 = 300;

/// Consecutive failed polls after which the client gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 32_000;

/// Bounded wait for a full sink before the item is dropped.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 2_000;

// ─── Delivery Policy ─────────────────────────────────────────────────

/// What the dispatcher does when a listener sink is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Wait up to `timeout_ms` for capacity, then drop with a warning.
    Block { timeout_ms: u64 },
    /// Drop immediately with a warning.
    DropWhenFull,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::Block {
            timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
        }
    }
}

// ─── Client Config ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identity reported to the service and carried by presence events.
    pub uuid: String,
    pub subscribe_timeout_ms: u64,
    /// `None` omits the heartbeat parameter.
    pub presence_timeout_secs: Option<u32>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub delivery: DeliveryPolicy,
    /// Send a leave request when data entities are unsubscribed.
    pub announce_leave: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uuid: generate_uuid(),
            subscribe_timeout_ms: DEFAULT_SUBSCRIBE_TIMEOUT_MS,
            presence_timeout_secs: Some(DEFAULT_PRESENCE_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            delivery: DeliveryPolicy::default(),
            announce_leave: true,
        }
    }
}

impl ClientConfig {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            ..Self::default()
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_presence_timeout(mut self, secs: Option<u32>) -> Self {
        self.presence_timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay_ms = base.as_millis() as u64;
        self.retry_max_delay_ms = max.as_millis() as u64;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryPolicy) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_announce_leave(mut self, announce: bool) -> Self {
        self.announce_leave = announce;
        self
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.subscribe_timeout_ms)
    }

    /// Backoff before retry `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at the configured maximum.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(2u64.saturating_pow(exp));
        Duration::from_millis(delay.min(self.retry_max_delay_ms))
    }
}

/// Per-process identity: PID plus wall-clock nanoseconds.
fn generate_uuid() -> String {
    format!(
        "pollcast-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    )
}
