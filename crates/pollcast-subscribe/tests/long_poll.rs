//! Registry changes while a poll is parked on the service.
//!
//! The service here holds idle polls for 30s, so anything observed within a
//! second can only come from the client abandoning the parked poll.

mod common;

use std::time::Duration;

use serde_json::json;

use common::*;
use pollcast_subscribe::{EntityKind, Listener, Notification};

const PROMPT: Duration = Duration::from_secs(1);

#[tokio::test]
async fn subscribe_restarts_the_parked_poll() -> anyhow::Result<()> {
    let svc = holding_service();
    let client = holding_client(&svc, "eager");

    let (a, mut ok_a, _ea) = Listener::channel(16);
    client.subscribe("a", a).await;
    expect_connected(&mut ok_a, EntityKind::Channel, "a").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (b, mut ok_b, _eb) = Listener::channel(16);
    client.subscribe("b", b).await;
    tokio::time::timeout(PROMPT, expect_connected(&mut ok_b, EntityKind::Channel, "b")).await??;

    svc.publish("b", json!("x")).await;
    let msg = tokio::time::timeout(PROMPT, recv(&mut ok_b)).await??;
    assert_eq!(msg.to_wire(), json!([1, "x", "b"]));
    Ok(())
}

#[tokio::test]
async fn unsubscribe_restarts_the_parked_poll() -> anyhow::Result<()> {
    let svc = holding_service();
    let client = holding_client(&svc, "shrinking");

    let (a, mut ok_a, _ea) = Listener::channel(16);
    let (b, mut ok_b, _eb) = Listener::channel(16);
    client.subscribe("a", a).await;
    client.subscribe("b", b).await;
    expect_connected(&mut ok_a, EntityKind::Channel, "a").await?;
    expect_connected(&mut ok_b, EntityKind::Channel, "b").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = svc.poll_count().await;

    let (listener, mut ok, _err) = Listener::channel(16);
    client.unsubscribe("b", listener).await;
    assert_eq!(recv(&mut ok).await?, Notification::unsubscribed(EntityKind::Channel, "b"));

    tokio::time::timeout(PROMPT, async {
        while svc.poll_count().await <= before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    svc.publish("a", json!("still")).await;
    let msg = tokio::time::timeout(PROMPT, recv(&mut ok_a)).await??;
    assert_eq!(msg.to_wire(), json!([1, "still", "a"]));
    Ok(())
}

#[tokio::test]
async fn messages_published_before_subscribe_are_not_replayed() -> anyhow::Result<()> {
    let svc = holding_service();
    let client = holding_client(&svc, "latecomer");

    let (a, mut ok_a, _ea) = Listener::channel(16);
    client.subscribe("a", a).await;
    expect_connected(&mut ok_a, EntityKind::Channel, "a").await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    svc.publish("b", json!("before-subscribe")).await;

    let (b, mut ok_b, _eb) = Listener::channel(16);
    client.subscribe("b", b).await;
    expect_connected(&mut ok_b, EntityKind::Channel, "b").await?;

    svc.publish("b", json!("after-subscribe")).await;
    let msg = recv(&mut ok_b).await?;
    assert_eq!(msg.to_wire(), json!([1, "after-subscribe", "b"]));
    expect_silence(&mut ok_b, Duration::from_millis(200)).await?;
    Ok(())
}
