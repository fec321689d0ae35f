//! Public client: an explicitly owned handle over one registry, one cursor
//! and one poll loop.
//!
//! All operations report outcomes through the listener sinks passed in;
//! none of them return errors directly. Several clients may run side by
//! side in one process.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;

use pollcast_core::types::split_names;
use pollcast_core::wire::{self, LeaveBody};
use pollcast_core::{
    ChannelEntity, ConnectionState, EntityKind, GroupAdmin, LeaveRequest, Notification,
    SubscribeError, Timetoken, Transport, TransportError, TransportResponse,
};

use crate::config::ClientConfig;
use crate::connection;
use crate::poll_loop::{ClientState, Shared};
use crate::presence;
use crate::registry::{EntityKey, Listener};
use crate::sink::{Delivery, deliver, deliver_all};

pub struct SubscribeClient {
    shared: Arc<Shared>,
    admin: Option<Arc<dyn GroupAdmin>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl SubscribeClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let state = ClientState::default();
        let state_rx = state.tracker.subscribe();
        tracing::debug!(uuid = %config.uuid, "subscribe client created");
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                state: Mutex::new(state),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            admin: None,
            state_rx,
        }
    }

    /// Attach the channel-group registry used by the `channel_group_*`
    /// membership calls.
    pub fn with_group_admin(mut self, admin: Arc<dyn GroupAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn uuid(&self) -> &str {
        &self.shared.config.uuid
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub async fn current_set(&self) -> Vec<ChannelEntity> {
        self.shared.state.lock().await.registry.current_set()
    }

    pub async fn cursor(&self) -> Timetoken {
        self.shared.state.lock().await.cursor.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    // ── Subscribe / Unsubscribe ──────────────────────────────────────

    /// Subscribe to a comma-separated list of channels.
    pub async fn subscribe(&self, channels: &str, listener: Listener) {
        self.add(EntityKind::Channel, channels, listener).await;
    }

    pub async fn unsubscribe(&self, channels: &str, listener: Listener) {
        self.remove(EntityKind::Channel, channels, listener).await;
    }

    /// Subscribe to a comma-separated list of channel groups. A name with
    /// the `-pnpres` suffix subscribes to the group's presence events.
    pub async fn channel_group_subscribe(&self, groups: &str, listener: Listener) {
        self.add(EntityKind::ChannelGroup, groups, listener).await;
    }

    pub async fn channel_group_unsubscribe(&self, groups: &str, listener: Listener) {
        self.remove(EntityKind::ChannelGroup, groups, listener).await;
    }

    async fn add(&self, kind: EntityKind, names: &str, listener: Listener) {
        let names = split_names(names);
        if names.is_empty() {
            tracing::warn!(%kind, "subscribe called with no names");
            return;
        }
        let keys: Vec<EntityKey> = names.iter().map(|n| EntityKey::new(kind, n.clone())).collect();

        let errors = {
            let mut st = self.shared.state.lock().await;
            if st.closed {
                vec![SubscribeError::ClientClosed]
            } else {
                match st.registry.add(&keys, listener.clone()) {
                    Ok(binding) => {
                        tracing::info!(%kind, names = ?names, binding, "subscribing");
                        self.shared.ensure_loop(&mut st);
                        Vec::new()
                    }
                    Err(errors) => errors,
                }
            }
        };

        let deliveries = errors
            .into_iter()
            .map(|e| Delivery::new(&listener.error, e.into()))
            .collect();
        deliver_all(deliveries, self.shared.config.delivery).await;
    }

    async fn remove(&self, kind: EntityKind, names: &str, listener: Listener) {
        let names = split_names(names);
        if names.is_empty() {
            tracing::warn!(%kind, "unsubscribe called with no names");
            return;
        }
        let keys: Vec<EntityKey> = names.iter().map(|n| EntityKey::new(kind, n.clone())).collect();

        let outcome = {
            let mut st = self.shared.state.lock().await;
            if st.closed {
                drop(st);
                self.report(&listener, SubscribeError::ClientClosed).await;
                return;
            }
            let outcome = st.registry.remove(&keys);
            if !outcome.removed.is_empty() && st.loop_running {
                self.shared.wake.notify_one();
            }
            outcome
        };

        if !outcome.removed.is_empty() {
            tracing::info!(%kind, removed = outcome.removed.len(), "unsubscribed");
        }
        let mut deliveries = connection::unsubscribed_notices(&outcome.removed, &listener);
        deliveries.extend(
            outcome
                .missing
                .into_iter()
                .map(|e| Delivery::new(&listener.error, e.into())),
        );
        deliver_all(deliveries, self.shared.config.delivery).await;

        let departed: Vec<&EntityKey> = outcome
            .removed
            .iter()
            .filter(|k| !k.is_presence())
            .collect();
        if self.shared.config.announce_leave && !departed.is_empty() {
            self.announce_leave(&departed, &listener).await;
        }
    }

    async fn announce_leave(&self, departed: &[&EntityKey], listener: &Listener) {
        let mut request = LeaveRequest {
            channels: Vec::new(),
            groups: Vec::new(),
            uuid: self.shared.config.uuid.clone(),
        };
        for key in departed {
            match key.kind {
                EntityKind::Channel => request.channels.push(key.name.clone()),
                EntityKind::ChannelGroup => request.groups.push(key.name.clone()),
            }
        }

        let result = self.shared.transport.leave(&request).await;
        let notification = match result {
            Ok(resp) if resp.is_success() => {
                let body = serde_json::from_slice::<LeaveBody>(&resp.body).unwrap_or_else(|_| {
                    LeaveBody {
                        status: resp.status,
                        message: String::from_utf8_lossy(&resp.body).into_owned(),
                        action: Some("leave".to_string()),
                        service: None,
                    }
                });
                tracing::debug!(uuid = %request.uuid, "leave acknowledged");
                presence::own_leave(&request.uuid, request.channels, request.groups, &body)
            }
            Ok(resp) => {
                let body = wire::decode_service_error(resp.status, &resp.body);
                SubscribeError::Leave {
                    reason: format!("{} {}", resp.status, body.message),
                }
                .into()
            }
            Err(e) => SubscribeError::Leave {
                reason: e.to_string(),
            }
            .into(),
        };

        let sink = if notification.is_error() {
            &listener.error
        } else {
            &listener.success
        };
        deliver(sink, notification, self.shared.config.delivery).await;
    }

    // ── Channel Group Membership ─────────────────────────────────────

    pub async fn channel_group_add_channel(&self, group: &str, channels: &str, listener: Listener) {
        let Some(admin) = self.group_admin(group, &listener).await else {
            return;
        };
        let channels = split_names(channels);
        let result = admin.add_channels(group, &channels).await;
        self.admin_outcome(group, result, &listener).await;
    }

    pub async fn channel_group_remove_channel(
        &self,
        group: &str,
        channels: &str,
        listener: Listener,
    ) {
        let Some(admin) = self.group_admin(group, &listener).await else {
            return;
        };
        let channels = split_names(channels);
        let result = admin.remove_channels(group, &channels).await;
        self.admin_outcome(group, result, &listener).await;
    }

    pub async fn channel_group_remove_group(&self, group: &str, listener: Listener) {
        let Some(admin) = self.group_admin(group, &listener).await else {
            return;
        };
        let result = admin.remove_group(group).await;
        self.admin_outcome(group, result, &listener).await;
    }

    pub async fn channel_group_list_channels(&self, group: &str, listener: Listener) {
        let Some(admin) = self.group_admin(group, &listener).await else {
            return;
        };
        let result = admin.list_channels(group).await;
        self.admin_outcome(group, result, &listener).await;
    }

    async fn group_admin(&self, group: &str, listener: &Listener) -> Option<Arc<dyn GroupAdmin>> {
        match &self.admin {
            Some(admin) => Some(Arc::clone(admin)),
            None => {
                self.report(
                    listener,
                    SubscribeError::GroupAdmin {
                        group: group.to_string(),
                        reason: "no channel group registry configured".to_string(),
                    },
                )
                .await;
                None
            }
        }
    }

    async fn admin_outcome(
        &self,
        group: &str,
        result: Result<TransportResponse, TransportError>,
        listener: &Listener,
    ) {
        let reason = match result {
            Ok(resp) if resp.is_success() => {
                tracing::debug!(group, "channel group request acknowledged");
                deliver(
                    &listener.success,
                    Notification::Response(resp.body_json()),
                    self.shared.config.delivery,
                )
                .await;
                return;
            }
            Ok(resp) => {
                let body = wire::decode_service_error(resp.status, &resp.body);
                format!("{} {}", resp.status, body.message)
            }
            Err(e) => e.to_string(),
        };
        tracing::warn!(group, %reason, "channel group request failed");
        self.report(
            listener,
            SubscribeError::GroupAdmin {
                group: group.to_string(),
                reason,
            },
        )
        .await;
    }

    async fn report(&self, listener: &Listener, error: SubscribeError) {
        deliver(&listener.error, error.into(), self.shared.config.delivery).await;
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop the poll loop and release every subscription. Each active
    /// binding receives one `ClientClosed`. Later calls are refused the
    /// same way. Idempotent.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        let (listeners, task) = {
            let mut st = self.shared.state.lock().await;
            st.closed = true;
            let listeners = st.registry.drain();
            st.cursor.reset();
            st.tracker.close();
            (listeners, st.task.take())
        };
        if !listeners.is_empty() {
            tracing::info!(bindings = listeners.len(), "closing subscribe client");
        }

        let deliveries = listeners
            .iter()
            .map(|l| Delivery::new(&l.error, SubscribeError::ClientClosed.into()))
            .collect();
        deliver_all(deliveries, self.shared.config.delivery).await;

        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("poll loop task failed: {e}");
            }
        }
    }
}

impl Drop for SubscribeClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use pollcast_core::PollRequest;
    use serde_json::json;

    /// Transport that parks every poll and acknowledges every leave.
    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn subscribe(
            &self,
            _request: &PollRequest,
        ) -> Result<TransportResponse, TransportError> {
            std::future::pending().await
        }

        async fn leave(
            &self,
            _request: &LeaveRequest,
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse::ok_json(&LeaveBody::ok()))
        }
    }

    struct EchoAdmin;

    #[async_trait]
    impl GroupAdmin for EchoAdmin {
        async fn add_channels(
            &self,
            group: &str,
            channels: &[String],
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse::ok_json(&json!({"group": group, "channels": channels})))
        }

        async fn remove_channels(
            &self,
            _group: &str,
            _channels: &[String],
        ) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse::new(403, "Forbidden"))
        }

        async fn remove_group(&self, _group: &str) -> Result<TransportResponse, TransportError> {
            Err(TransportError::Connect("refused".into()))
        }

        async fn list_channels(&self, group: &str) -> Result<TransportResponse, TransportError> {
            Ok(TransportResponse::ok_json(&json!({"group": group, "channels": []})))
        }
    }

    fn client() -> SubscribeClient {
        SubscribeClient::new(ClientConfig::new("unit"), Arc::new(IdleTransport))
    }

    async fn recv(rx: &mut tokio::sync::mpsc::Receiver<Notification>) -> Notification {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn subscribe_registers_pending_and_starts_loop() {
        let c = client();
        let (l, _ok, _err) = Listener::channel(4);
        c.channel_group_subscribe("g1, g2", l).await;

        let set = c.current_set().await;
        assert_eq!(set.len(), 2);
        assert!(set.iter().all(|e| !e.subscribed && e.kind == EntityKind::ChannelGroup));
        assert_eq!(c.connection_state(), ConnectionState::Connecting);
        assert_eq!(c.uuid(), "unit");
    }

    #[tokio::test]
    async fn empty_name_list_is_ignored() {
        let c = client();
        let (l, _ok, mut err) = Listener::channel(4);
        c.subscribe(" , ", l).await;
        assert!(c.current_set().await.is_empty());
        assert!(err.try_recv().is_err());
    }

    #[tokio::test]
    async fn duplicate_subscribe_reports_error() {
        let c = client();
        let (first, _ok1, mut err1) = Listener::channel(4);
        let (second, _ok2, mut err2) = Listener::channel(4);
        c.channel_group_subscribe("g", first).await;
        c.channel_group_subscribe("g", second).await;

        let text = recv(&mut err2).await.to_string();
        assert!(text.contains("Subscription to channel group"));
        assert!(text.contains("already subscribed"));
        assert!(err1.try_recv().is_err());
        assert_eq!(c.current_set().await.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_delivers_notice_then_leave() {
        let c = client();
        let (l, _ok, _err) = Listener::channel(4);
        c.subscribe("news", l).await;

        let (l, mut ok, _err) = Listener::channel(4);
        c.unsubscribe("news", l).await;
        assert_eq!(recv(&mut ok).await, Notification::unsubscribed(EntityKind::Channel, "news"));
        let leave = recv(&mut ok).await;
        assert_eq!(leave.to_wire()["action"], "leave");
        assert_eq!(leave.to_wire()["status"], 200);
    }

    #[tokio::test]
    async fn unsubscribe_presence_only_skips_leave() {
        let c = client();
        let (l, _ok, _err) = Listener::channel(4);
        c.channel_group_subscribe("g-pnpres", l).await;

        let (l, mut ok, _err) = Listener::channel(4);
        c.channel_group_unsubscribe("g-pnpres", l).await;
        assert!(matches!(recv(&mut ok).await, Notification::Unsubscribed { .. }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ok.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_notifies_each_binding_once() {
        let c = client();
        let (a, _ok_a, mut err_a) = Listener::channel(4);
        let (b, _ok_b, mut err_b) = Listener::channel(4);
        c.subscribe("x,y", a).await;
        c.channel_group_subscribe("g", b).await;

        c.close().await;
        c.close().await;
        assert_eq!(recv(&mut err_a).await, Notification::Error(SubscribeError::ClientClosed));
        assert_eq!(recv(&mut err_b).await, Notification::Error(SubscribeError::ClientClosed));
        assert!(err_a.try_recv().is_err());
        assert_eq!(c.connection_state(), ConnectionState::Disconnected);
        assert!(c.current_set().await.is_empty());

        let (late, _ok, mut late_err) = Listener::channel(4);
        c.subscribe("z", late).await;
        assert_eq!(recv(&mut late_err).await, Notification::Error(SubscribeError::ClientClosed));
    }

    #[tokio::test]
    async fn group_admin_outcomes() {
        let c = client().with_group_admin(Arc::new(EchoAdmin));

        let (l, mut ok, _err) = Listener::channel(4);
        c.channel_group_add_channel("G", "a, b", l).await;
        let Notification::Response(body) = recv(&mut ok).await else {
            panic!("expected response");
        };
        assert_eq!(body["channels"], json!(["a", "b"]));

        let (l, _ok, mut err) = Listener::channel(4);
        c.channel_group_remove_channel("G", "a", l).await;
        assert!(recv(&mut err).await.to_string().contains("403"));

        let (l, _ok, mut err) = Listener::channel(4);
        c.channel_group_remove_group("G", l).await;
        assert!(recv(&mut err).await.to_string().contains("refused"));

        let (l, mut ok, _err) = Listener::channel(4);
        c.channel_group_list_channels("G", l).await;
        assert!(matches!(recv(&mut ok).await, Notification::Response(_)));
    }

    #[tokio::test]
    async fn missing_group_admin_is_reported() {
        let c = client();
        let (l, _ok, mut err) = Listener::channel(4);
        c.channel_group_list_channels("G", l).await;
        let n = recv(&mut err).await;
        assert!(n.to_string().contains("no channel group registry"));
    }
}
