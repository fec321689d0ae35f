//! Listener sinks and the bounded delivery policy.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

use pollcast_core::Notification;

use crate::config::DeliveryPolicy;

/// Bounded queue a listener drains.
pub type Sink = mpsc::Sender<Notification>;

/// A notification bound for one sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub sink: Sink,
    pub notification: Notification,
}

impl Delivery {
    pub fn new(sink: &Sink, notification: Notification) -> Self {
        Self {
            sink: sink.clone(),
            notification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Sink stayed full past the policy bound.
    Dropped,
    /// Receiver was dropped by the caller.
    Closed,
}

/// Deliver one notification according to `policy`. Never blocks longer than
/// the policy bound.
pub async fn deliver(
    sink: &Sink,
    notification: Notification,
    policy: DeliveryPolicy,
) -> DeliveryOutcome {
    match policy {
        DeliveryPolicy::Block { timeout_ms } => {
            match sink
                .send_timeout(notification, Duration::from_millis(timeout_ms))
                .await
            {
                Ok(()) => DeliveryOutcome::Delivered,
                Err(SendTimeoutError::Timeout(n)) => {
                    tracing::warn!(
                        timeout_ms,
                        item = ?n.name(),
                        "listener sink full, dropping notification"
                    );
                    DeliveryOutcome::Dropped
                }
                Err(SendTimeoutError::Closed(_)) => {
                    tracing::debug!("listener sink closed");
                    DeliveryOutcome::Closed
                }
            }
        }
        DeliveryPolicy::DropWhenFull => match sink.try_send(notification) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(n)) => {
                tracing::warn!(item = ?n.name(), "listener sink full, dropping notification");
                DeliveryOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("listener sink closed");
                DeliveryOutcome::Closed
            }
        },
    }
}

/// Counters of one delivery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Deliver in order. Per-sink order follows the input order.
pub async fn deliver_all(deliveries: Vec<Delivery>, policy: DeliveryPolicy) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    for d in deliveries {
        match deliver(&d.sink, d.notification, policy).await {
            DeliveryOutcome::Delivered => stats.delivered += 1,
            DeliveryOutcome::Dropped => stats.dropped += 1,
            DeliveryOutcome::Closed => stats.closed += 1,
        }
    }
    stats
}
