//! Long-poll loop: one task per client, multiplexed across every entity in
//! the registry.
//!
//! Each cycle snapshots the registry, issues one poll and races it against
//! cancellation and the registry wake signal. A wake abandons the in-flight
//! poll; the cursor was not advanced, so the next poll resumes where the
//! abandoned one would have.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pollcast_core::wire::{self, ServiceErrorBody};
use pollcast_core::{
    ConnectionState, EntityKind, Envelope, PollRequest, SubscribeError, Timetoken, Transport,
    TransportError, TransportResponse,
};

use crate::config::ClientConfig;
use crate::connection::{self, ConnectionTracker};
use crate::cursor::TimetokenCursor;
use crate::dispatcher;
use crate::registry::{EntityKey, Registry, Snapshot};
use crate::sink::{Delivery, DeliveryStats, deliver_all};

// ─── Shared State ────────────────────────────────────────────────────

/// Mutable client state. Everything here is read and written under one lock.
#[derive(Debug, Default)]
pub(crate) struct ClientState {
    pub registry: Registry,
    pub tracker: ConnectionTracker,
    pub cursor: TimetokenCursor,
    /// A loop task is alive and will observe the next wake.
    pub loop_running: bool,
    pub closed: bool,
    pub task: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    pub config: ClientConfig,
    pub transport: Arc<dyn Transport>,
    pub state: Mutex<ClientState>,
    /// Registry changed; restart the in-flight poll.
    pub wake: Notify,
    pub cancel: CancellationToken,
}

impl Shared {
    /// Start the loop task if none is running, otherwise wake it.
    /// Must be called with `state` locked.
    pub(crate) fn ensure_loop(self: &Arc<Self>, state: &mut ClientState) {
        if state.loop_running {
            self.wake.notify_one();
            return;
        }
        state.loop_running = true;
        if state.tracker.state() == ConnectionState::Disconnected {
            let _ = state.tracker.transition(ConnectionState::Connecting);
        }
        state.task = Some(tokio::spawn(run(Arc::clone(self))));
        tracing::debug!(uuid = %self.config.uuid, "poll loop started");
    }
}

// ─── Loop ────────────────────────────────────────────────────────────

/// Result of one poll attempt, before it is applied.
enum PollOutcome {
    Envelope(Envelope),
    Refused(TransportResponse),
    Failed(String),
    Fatal(String),
}

fn classify(result: Result<TransportResponse, TransportError>) -> PollOutcome {
    match result {
        Ok(resp) if resp.is_success() => match wire::decode_envelope(&resp.body) {
            Ok(envelope) => PollOutcome::Envelope(envelope),
            Err(e) => PollOutcome::Failed(e.to_string()),
        },
        Ok(resp) => PollOutcome::Refused(resp),
        Err(e) if e.is_retryable() => PollOutcome::Failed(e.to_string()),
        Err(e) => PollOutcome::Fatal(e.to_string()),
    }
}

pub(crate) async fn run(shared: Arc<Shared>) {
    let mut failures: u32 = 0;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let Some((request, snapshot)) = next_request(&shared).await else {
            return;
        };

        let result = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = shared.wake.notified() => {
                tracing::debug!(
                    generation = snapshot.generation,
                    "registry changed, restarting poll"
                );
                continue;
            }
            result = tokio::time::timeout(
                shared.config.subscribe_timeout(),
                shared.transport.subscribe(&request),
            ) => result.unwrap_or(Err(TransportError::Timeout)),
        };

        let reason = match classify(result) {
            PollOutcome::Envelope(envelope) => {
                failures = 0;
                let cursor = envelope.cursor;
                let stats = apply_envelope(&shared, &request, &snapshot, envelope).await;
                if stats.dropped > 0 {
                    tracing::warn!(
                        dropped = stats.dropped,
                        delivered = stats.delivered,
                        cursor = %cursor,
                        "listener sinks full, notifications dropped"
                    );
                }
                continue;
            }
            PollOutcome::Refused(resp) => {
                let body = wire::decode_service_error(resp.status, &resp.body);
                if body.is_empty_subscription_set()
                    && reject_empty(&shared, &request, &snapshot, &body).await > 0
                {
                    continue;
                }
                if !resp.is_retryable() && reject_pending(&shared, &snapshot, &body).await > 0 {
                    continue;
                }
                format!("{} {}", resp.status, body.message)
            }
            PollOutcome::Failed(reason) => reason,
            PollOutcome::Fatal(reason) => {
                give_up(&shared, failures + 1, reason).await;
                return;
            }
        };

        failures = failures.saturating_add(1);
        if failures >= shared.config.max_retries.max(1) {
            give_up(&shared, failures, reason).await;
            return;
        }

        let delay = shared.config.backoff_delay(failures);
        let last_advance = {
            let mut st = shared.state.lock().await;
            let _ = st.tracker.transition(ConnectionState::Reconnecting);
            st.cursor.advanced_at()
        };
        let stalled_ms = last_advance.map(|at| (Utc::now() - at).num_milliseconds());
        tracing::warn!(
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            stalled_ms,
            %reason,
            "subscribe poll failed, backing off"
        );

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.state.lock().await.loop_running = false;
    tracing::debug!("poll loop cancelled");
}

/// Snapshot the registry and build the next request. Returns `None` (and
/// marks the loop stopped) when there is nothing left to poll.
async fn next_request(shared: &Shared) -> Option<(PollRequest, Snapshot)> {
    let mut st = shared.state.lock().await;
    if st.closed {
        st.loop_running = false;
        return None;
    }

    let snapshot = st.registry.snapshot();
    if snapshot.is_empty() {
        st.cursor.reset();
        let _ = st.tracker.transition(ConnectionState::Disconnected);
        st.loop_running = false;
        tracing::info!("subscription set empty, poll loop stopping");
        return None;
    }

    // New entities need a handshake before their first confirmed poll.
    let handshake = !snapshot.pending.is_empty() || st.cursor.is_zero();
    let cursor = if handshake {
        Timetoken::ZERO
    } else {
        st.cursor.current()
    };

    let request = PollRequest {
        channels: snapshot.channels.clone(),
        groups: snapshot.groups.clone(),
        cursor,
        uuid: shared.config.uuid.clone(),
        heartbeat: shared.config.presence_timeout_secs,
    };
    Some((request, snapshot))
}

// ─── Outcomes ────────────────────────────────────────────────────────

async fn apply_envelope(
    shared: &Shared,
    request: &PollRequest,
    snapshot: &Snapshot,
    envelope: Envelope,
) -> DeliveryStats {
    let deliveries = {
        let mut st = shared.state.lock().await;
        if st.closed {
            return DeliveryStats::default();
        }
        if let Err(e) = st.tracker.transition(ConnectionState::Connected) {
            tracing::debug!("connection transition skipped: {e}");
        }

        // A handshake only seeds the cursor; an existing one is kept so
        // entities already confirmed do not skip entries.
        let next = envelope.cursor;
        if !request.is_handshake() || st.cursor.is_zero() {
            if let Err(e) = st.cursor.advance(next, Utc::now()) {
                tracing::warn!("cursor advance refused: {e}");
            }
        }

        let confirmed = st.registry.mark_connected(&snapshot.pending, next);
        for (key, _) in &confirmed {
            tracing::info!(kind = %key.kind, name = %key.name, "subscription connected");
        }
        let mut deliveries = connection::connected_notices(&confirmed);

        let routed = dispatcher::route(&st.registry, envelope);
        if routed.unrouted > 0 || routed.stale > 0 {
            tracing::debug!(
                unrouted = routed.unrouted,
                stale = routed.stale,
                "entries not delivered"
            );
        }
        deliveries.extend(routed.deliveries);
        deliveries
    };
    deliver_all(deliveries, shared.config.delivery).await
}

/// Drop the groups the service reported as empty. Returns how many were
/// rejected.
async fn reject_empty(
    shared: &Shared,
    request: &PollRequest,
    snapshot: &Snapshot,
    body: &ServiceErrorBody,
) -> usize {
    let mut targets: Vec<String> = body.groups().to_vec();
    if targets.is_empty() {
        targets = snapshot
            .pending
            .iter()
            .filter(|k| k.kind == EntityKind::ChannelGroup)
            .map(|k| k.name.clone())
            .collect();
    }
    if targets.is_empty() {
        targets = request.groups.clone();
    }

    let deliveries: Vec<Delivery> = {
        let mut st = shared.state.lock().await;
        targets
            .into_iter()
            .filter_map(|name| {
                let listener = st.registry.reject(&EntityKey::group(name.clone()))?;
                tracing::warn!(group = %name, "channel group resolves to no channels");
                Some(Delivery::new(
                    &listener.error,
                    SubscribeError::EmptySubscriptionSet { name }.into(),
                ))
            })
            .collect()
    };
    let rejected = deliveries.len();
    deliver_all(deliveries, shared.config.delivery).await;
    rejected
}

/// Refuse every entity still pending in `snapshot`. Returns how many were
/// rejected.
async fn reject_pending(shared: &Shared, snapshot: &Snapshot, body: &ServiceErrorBody) -> usize {
    let deliveries: Vec<Delivery> = {
        let mut st = shared.state.lock().await;
        snapshot
            .pending
            .iter()
            .filter_map(|key| {
                let listener = st.registry.reject(key)?;
                tracing::warn!(
                    kind = %key.kind,
                    name = %key.name,
                    status = body.status,
                    "subscription rejected"
                );
                Some(Delivery::new(
                    &listener.error,
                    SubscribeError::Rejected {
                        kind: key.kind,
                        name: key.name.clone(),
                        status: body.status,
                        message: body.message.clone(),
                    }
                    .into(),
                ))
            })
            .collect()
    };
    let rejected = deliveries.len();
    deliver_all(deliveries, shared.config.delivery).await;
    rejected
}

/// Retry ceiling reached: notify every binding once and close the client.
async fn give_up(shared: &Shared, attempts: u32, reason: String) {
    let listeners = {
        let mut st = shared.state.lock().await;
        let listeners = st.registry.drain();
        st.cursor.reset();
        st.tracker.close();
        st.closed = true;
        st.loop_running = false;
        listeners
    };
    tracing::error!(attempts, %reason, "subscribe loop giving up");

    let deliveries = listeners
        .iter()
        .map(|l| {
            Delivery::new(
                &l.error,
                SubscribeError::RetriesExhausted {
                    attempts,
                    reason: reason.clone(),
                }
                .into(),
            )
        })
        .collect();
    deliver_all(deliveries, shared.config.delivery).await;
}
