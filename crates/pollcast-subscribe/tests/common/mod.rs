//! Shared helpers for the integration tests: an in-memory service, clients
//! wired to it, and bounded receives.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::mpsc::Receiver;

use pollcast_core::GroupAdmin;
use pollcast_sim::{InMemoryService, ServiceConfig};
use pollcast_subscribe::{ClientConfig, EntityKind, Notification, SubscribeClient};

pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Service with a short hold so idle polls cycle quickly.
pub fn service() -> Arc<InMemoryService> {
    pollcast_sim::init_tracing();
    Arc::new(InMemoryService::new(
        ServiceConfig::default().with_hold(Duration::from_millis(100)),
    ))
}

/// Service that parks idle polls far longer than any test runs.
pub fn holding_service() -> Arc<InMemoryService> {
    pollcast_sim::init_tracing();
    Arc::new(InMemoryService::new(
        ServiceConfig::default().with_hold(Duration::from_secs(30)),
    ))
}

pub fn config(uuid: &str) -> ClientConfig {
    ClientConfig::new(uuid)
        .with_subscribe_timeout(Duration::from_secs(2))
        .with_retry_delays(Duration::from_millis(20), Duration::from_millis(100))
}

pub fn client(svc: &Arc<InMemoryService>, uuid: &str) -> SubscribeClient {
    client_with(svc, config(uuid))
}

pub fn client_with(svc: &Arc<InMemoryService>, config: ClientConfig) -> SubscribeClient {
    SubscribeClient::new(config, svc.clone()).with_group_admin(svc.clone())
}

/// Client whose own poll timeout outlasts [`holding_service`]'s hold.
pub fn holding_client(svc: &Arc<InMemoryService>, uuid: &str) -> SubscribeClient {
    client_with(svc, config(uuid).with_subscribe_timeout(Duration::from_secs(60)))
}

pub async fn create_group(
    svc: &InMemoryService,
    group: &str,
    channels: &[&str],
) -> anyhow::Result<()> {
    let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
    let resp = svc.add_channels(group, &channels).await?;
    if !resp.is_success() {
        bail!("group {group} not created: {}", resp.status);
    }
    Ok(())
}

pub async fn recv(rx: &mut Receiver<Notification>) -> anyhow::Result<Notification> {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .context("timed out waiting for notification")?
        .context("sink closed")
}

/// Skip everything but presence events.
pub async fn recv_presence(
    rx: &mut Receiver<Notification>,
) -> anyhow::Result<pollcast_subscribe::PresenceEvent> {
    loop {
        if let Notification::Presence(event) = recv(rx).await? {
            return Ok(event);
        }
    }
}

pub async fn expect_connected(
    rx: &mut Receiver<Notification>,
    kind: EntityKind,
    name: &str,
) -> anyhow::Result<()> {
    let n = recv(rx).await?;
    if n != Notification::connected(kind, name) {
        bail!("expected connected for {name}, got {n}");
    }
    Ok(())
}

/// Nothing arrives within `window`.
pub async fn expect_silence(
    rx: &mut Receiver<Notification>,
    window: Duration,
) -> anyhow::Result<()> {
    match tokio::time::timeout(window, rx.recv()).await {
        Err(_) => Ok(()),
        Ok(None) => Ok(()),
        Ok(Some(n)) => bail!("unexpected notification: {n}"),
    }
}
