//! Collaborator boundary: the request transport and the channel-group
//! registry.
//!
//! Both are object-safe async traits so a client can hold them as
//! `Arc<dyn Transport>`. Implementations own connection pooling, TLS and
//! HTTP; the engine only sees a status code and a body.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Timetoken;

// ─── Requests ────────────────────────────────────────────────────────

/// One multiplexed long-poll covering every subscribed channel and group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    /// Zero requests a handshake: the service answers at once with its
    /// current timetoken.
    pub cursor: Timetoken,
    pub uuid: String,
    /// Presence timeout announced to the service, in seconds.
    pub heartbeat: Option<u32>,
}

impl PollRequest {
    pub fn is_handshake(&self) -> bool {
        self.cursor.is_zero()
    }
}

/// Announces that `uuid` left the given channels and groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    pub uuid: String,
}

// ─── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// JSON body with status 200.
    pub fn ok_json<T: serde::Serialize>(body: &T) -> Self {
        Self::json(200, body)
    }

    pub fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        // Serializing plain wire structs cannot fail.
        Self::new(status, serde_json::to_vec(body).unwrap_or_default())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 5xx answers are worth retrying; other refusals are final.
    pub fn is_retryable(&self) -> bool {
        self.status >= 500
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.body).into())
        })
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport io error: {0}")]
    Io(String),

    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

// ─── Traits ──────────────────────────────────────────────────────────

/// Request transport for subscribe and leave calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a long-poll. Returns when the service has data, its hold time
    /// elapses, or it refuses the request.
    async fn subscribe(&self, request: &PollRequest) -> Result<TransportResponse, TransportError>;

    async fn leave(&self, request: &LeaveRequest) -> Result<TransportResponse, TransportError>;
}

/// Channel-group membership registry.
#[async_trait]
pub trait GroupAdmin: Send + Sync {
    async fn add_channels(
        &self,
        group: &str,
        channels: &[String],
    ) -> Result<TransportResponse, TransportError>;

    async fn remove_channels(
        &self,
        group: &str,
        channels: &[String],
    ) -> Result<TransportResponse, TransportError>;

    async fn remove_group(&self, group: &str) -> Result<TransportResponse, TransportError>;

    async fn list_channels(&self, group: &str) -> Result<TransportResponse, TransportError>;
}
