//! In-memory subscribe service.
//!
//! Messages go into one append-only log keyed by timetoken. A poll with a
//! zero cursor answers at once with the head timetoken; any other poll
//! returns the log entries after its cursor on the channels it covers, or
//! holds until something is published or `hold_ms` elapses.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use pollcast_core::types::{base_name, is_presence_name, presence_name};
use pollcast_core::wire::{AdminBody, LeaveBody, ServiceErrorBody, SubscribeBody, WireMessage};
use pollcast_core::{
    GroupAdmin, LeaveRequest, PollRequest, Timetoken, Transport, TransportError,
    TransportResponse,
};

// ─── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// How long an empty poll is held open.
    pub hold_ms: u64,
    /// Occupants not seen for this long time out. A shorter heartbeat sent
    /// by the client wins.
    pub presence_timeout_ms: u64,
    pub region: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            hold_ms: 1_000,
            presence_timeout_ms: 300_000,
            region: 1,
        }
    }
}

impl ServiceConfig {
    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold_ms = hold.as_millis() as u64;
        self
    }

    pub fn with_presence_timeout(mut self, timeout: Duration) -> Self {
        self.presence_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

// ─── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LogEntry {
    timetoken: Timetoken,
    channel: String,
    payload: Value,
    issuer: Option<String>,
}

#[derive(Debug)]
enum Scripted {
    Fail(TransportError),
    Respond(TransportResponse),
}

#[derive(Debug, Default)]
struct ServiceState {
    log: Vec<LogEntry>,
    head: Timetoken,
    groups: HashMap<String, BTreeSet<String>>,
    /// channel -> uuid -> presence deadline
    occupants: HashMap<String, HashMap<String, Instant>>,
    script: VecDeque<Scripted>,
    polls: u64,
}

/// Channel a poll covers and the subscription it matched through.
#[derive(Debug)]
struct Matcher {
    channel: String,
    via: Option<String>,
}

pub struct InMemoryService {
    config: ServiceConfig,
    state: Mutex<ServiceState>,
    head_tx: watch::Sender<u64>,
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

impl InMemoryService {
    pub fn new(config: ServiceConfig) -> Self {
        // The head is never zero: a zero cursor means "handshake".
        let head = Timetoken::from_datetime(Utc::now(), config.region);
        let (head_tx, _) = watch::channel(head.value);
        Self {
            config,
            state: Mutex::new(ServiceState {
                head,
                ..ServiceState::default()
            }),
            head_tx,
        }
    }

    pub fn config(&self) -> ServiceConfig {
        self.config
    }

    /// Append `payload` on `channel` and wake held polls.
    pub async fn publish(&self, channel: &str, payload: Value) -> Timetoken {
        let mut st = self.state.lock().await;
        let tt = self.append(&mut st, channel, payload, None);
        tracing::debug!(channel, timetoken = %tt, "published");
        tt
    }

    /// Like [`publish`](Self::publish), stamping the publisher's uuid.
    pub async fn publish_from(&self, channel: &str, payload: Value, issuer: &str) -> Timetoken {
        let mut st = self.state.lock().await;
        self.append(&mut st, channel, payload, Some(issuer.to_string()))
    }

    /// Fail the next subscribe call with `error`.
    pub async fn inject_failure(&self, error: TransportError) {
        self.state.lock().await.script.push_back(Scripted::Fail(error));
    }

    /// Answer the next subscribe call with `response`.
    pub async fn inject_response(&self, response: TransportResponse) {
        self.state
            .lock()
            .await
            .script
            .push_back(Scripted::Respond(response));
    }

    pub async fn head(&self) -> Timetoken {
        self.state.lock().await.head
    }

    pub async fn poll_count(&self) -> u64 {
        self.state.lock().await.polls
    }

    pub async fn occupancy(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .occupants
            .get(channel)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn next_timetoken(&self, st: &mut ServiceState) -> Timetoken {
        let mut tt = Timetoken::from_datetime(Utc::now(), self.config.region);
        if tt <= st.head {
            tt = Timetoken::new(st.head.value + 1, self.config.region);
        }
        st.head = tt;
        tt
    }

    fn append(
        &self,
        st: &mut ServiceState,
        channel: &str,
        payload: Value,
        issuer: Option<String>,
    ) -> Timetoken {
        let timetoken = self.next_timetoken(st);
        st.log.push(LogEntry {
            timetoken,
            channel: channel.to_string(),
            payload,
            issuer,
        });
        self.head_tx.send_replace(timetoken.value);
        timetoken
    }

    fn presence_event(&self, st: &mut ServiceState, channel: &str, action: &str, uuid: &str) {
        let occupancy = st.occupants.get(channel).map(HashMap::len).unwrap_or(0);
        let payload = json!({
            "action": action,
            "uuid": uuid,
            "occupancy": occupancy,
            "timestamp": Utc::now().timestamp(),
        });
        tracing::debug!(channel, action, uuid, occupancy, "presence event");
        self.append(st, &presence_name(channel), payload, None);
    }

    fn expire_occupants(&self, st: &mut ServiceState, now: Instant) {
        let mut expired: Vec<(String, String)> = Vec::new();
        for (channel, members) in st.occupants.iter_mut() {
            members.retain(|uuid, deadline| {
                let alive = *deadline > now;
                if !alive {
                    expired.push((channel.clone(), uuid.clone()));
                }
                alive
            });
        }
        for (channel, uuid) in expired {
            self.presence_event(st, &channel, "timeout", &uuid);
        }
    }

    /// Expand a request into channel matchers. Errors with the base groups
    /// that have no members.
    fn expand(st: &ServiceState, request: &PollRequest) -> Result<Vec<Matcher>, Vec<String>> {
        let mut matchers: Vec<Matcher> = request
            .channels
            .iter()
            .map(|c| Matcher {
                channel: c.clone(),
                via: None,
            })
            .collect();
        let mut empty = Vec::new();

        for group in &request.groups {
            let members = st.groups.get(base_name(group));
            if is_presence_name(group) {
                for member in members.into_iter().flatten() {
                    matchers.push(Matcher {
                        channel: presence_name(member),
                        via: Some(group.clone()),
                    });
                }
                continue;
            }
            match members {
                Some(members) if !members.is_empty() => {
                    matchers.extend(members.iter().map(|m| Matcher {
                        channel: m.clone(),
                        via: Some(group.clone()),
                    }));
                }
                _ => empty.push(group.clone()),
            }
        }

        if empty.is_empty() {
            Ok(matchers)
        } else {
            Err(empty)
        }
    }

    /// Record `uuid` on every data channel it covers. Newly occupied
    /// channels get a join event.
    fn refresh_presence(
        &self,
        st: &mut ServiceState,
        matchers: &[Matcher],
        request: &PollRequest,
        now: Instant,
    ) {
        let mut timeout = Duration::from_millis(self.config.presence_timeout_ms);
        if let Some(secs) = request.heartbeat {
            timeout = timeout.min(Duration::from_secs(u64::from(secs)));
        }
        let deadline = now + timeout;

        let channels: BTreeSet<&str> = matchers
            .iter()
            .map(|m| m.channel.as_str())
            .filter(|c| !is_presence_name(c))
            .collect();
        for channel in channels {
            let joined = st
                .occupants
                .entry(channel.to_string())
                .or_default()
                .insert(request.uuid.clone(), deadline)
                .is_none();
            if joined {
                self.presence_event(st, channel, "join", &request.uuid);
            }
        }
    }

    fn collect(st: &ServiceState, matchers: &[Matcher], after: Timetoken) -> SubscribeBody {
        let messages = st
            .log
            .iter()
            .filter(|e| e.timetoken > after)
            .filter_map(|e| {
                let matcher = matchers.iter().find(|m| m.channel == e.channel)?;
                Some(WireMessage {
                    channel: e.channel.clone(),
                    subscription: matcher.via.clone(),
                    payload: e.payload.clone(),
                    published: e.timetoken.into(),
                    issuer: e.issuer.clone(),
                    subscribe_key: None,
                })
            })
            .collect();
        SubscribeBody {
            cursor: st.head.into(),
            messages,
        }
    }
}

// ─── Transport ───────────────────────────────────────────────────────

#[async_trait]
impl Transport for InMemoryService {
    async fn subscribe(&self, request: &PollRequest) -> Result<TransportResponse, TransportError> {
        let now = Instant::now();
        let (matchers, mut head_rx) = {
            let mut st = self.state.lock().await;
            st.polls += 1;
            match st.script.pop_front() {
                Some(Scripted::Fail(e)) => return Err(e),
                Some(Scripted::Respond(r)) => return Ok(r),
                None => {}
            }

            self.expire_occupants(&mut st, now);

            let matchers = match Self::expand(&st, request) {
                Ok(m) => m,
                Err(empty) => {
                    tracing::debug!(groups = ?empty, "empty subscription set");
                    return Ok(TransportResponse::json(
                        400,
                        &ServiceErrorBody::empty_subscription_set(empty),
                    ));
                }
            };
            self.refresh_presence(&mut st, &matchers, request, now);

            if request.is_handshake() {
                let body = SubscribeBody {
                    cursor: st.head.into(),
                    messages: Vec::new(),
                };
                return Ok(TransportResponse::ok_json(&body));
            }

            let body = Self::collect(&st, &matchers, request.cursor);
            if !body.messages.is_empty() {
                return Ok(TransportResponse::ok_json(&body));
            }
            // Subscribed before the lock is released so no publish is missed.
            (matchers, self.head_tx.subscribe())
        };

        let hold = Duration::from_millis(self.config.hold_ms);
        let deadline = Instant::now() + hold;
        loop {
            if tokio::time::timeout_at(deadline, head_rx.changed()).await.is_err() {
                break;
            }
            let st = self.state.lock().await;
            let body = Self::collect(&st, &matchers, request.cursor);
            if !body.messages.is_empty() {
                return Ok(TransportResponse::ok_json(&body));
            }
        }

        let st = self.state.lock().await;
        Ok(TransportResponse::ok_json(&Self::collect(&st, &matchers, request.cursor)))
    }

    async fn leave(&self, request: &LeaveRequest) -> Result<TransportResponse, TransportError> {
        let mut st = self.state.lock().await;

        let mut channels: BTreeSet<String> = request
            .channels
            .iter()
            .filter(|c| !is_presence_name(c))
            .cloned()
            .collect();
        for group in request.groups.iter().filter(|g| !is_presence_name(g)) {
            if let Some(members) = st.groups.get(group) {
                channels.extend(members.iter().cloned());
            }
        }

        for channel in channels {
            let left = st
                .occupants
                .get_mut(&channel)
                .is_some_and(|m| m.remove(&request.uuid).is_some());
            if left {
                self.presence_event(&mut st, &channel, "leave", &request.uuid);
            }
        }
        Ok(TransportResponse::ok_json(&LeaveBody::ok()))
    }
}

// ─── Channel Groups ──────────────────────────────────────────────────

fn invalid_group() -> TransportResponse {
    TransportResponse::json(
        400,
        &json!({"status": 400, "error": true, "message": "Invalid channel group name"}),
    )
}

#[async_trait]
impl GroupAdmin for InMemoryService {
    async fn add_channels(
        &self,
        group: &str,
        channels: &[String],
    ) -> Result<TransportResponse, TransportError> {
        if group.is_empty() || is_presence_name(group) {
            return Ok(invalid_group());
        }
        let mut st = self.state.lock().await;
        st.groups
            .entry(group.to_string())
            .or_default()
            .extend(channels.iter().cloned());
        tracing::debug!(group, added = channels.len(), "channel group updated");
        Ok(TransportResponse::ok_json(&AdminBody::ok(None)))
    }

    async fn remove_channels(
        &self,
        group: &str,
        channels: &[String],
    ) -> Result<TransportResponse, TransportError> {
        let mut st = self.state.lock().await;
        if let Some(members) = st.groups.get_mut(group) {
            for channel in channels {
                members.remove(channel);
            }
        }
        Ok(TransportResponse::ok_json(&AdminBody::ok(None)))
    }

    async fn remove_group(&self, group: &str) -> Result<TransportResponse, TransportError> {
        self.state.lock().await.groups.remove(group);
        Ok(TransportResponse::ok_json(&AdminBody::ok(None)))
    }

    async fn list_channels(&self, group: &str) -> Result<TransportResponse, TransportError> {
        let st = self.state.lock().await;
        let channels: Vec<&String> = st.groups.get(group).into_iter().flatten().collect();
        Ok(TransportResponse::ok_json(&AdminBody::ok(Some(json!({
            "group": group,
            "channels": channels,
        })))))
    }
}
