//! Error taxonomy shared by the engine and its collaborators.

use thiserror::Error;

use crate::types::EntityKind;

/// Errors delivered through a listener's error sink.
///
/// The rendered text always carries the discriminating phrase and the
/// offending name so callers can match on substrings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("Subscription to {kind} '{name}' already subscribed")]
    AlreadySubscribed { kind: EntityKind, name: String },

    #[error("Subscription to {kind} '{name}' not subscribed")]
    NotSubscribed { kind: EntityKind, name: String },

    #[error("Channel group or groups result in empty subscription set: '{name}'")]
    EmptySubscriptionSet { name: String },

    #[error("Subscription to {kind} '{name}' rejected: {status} {message}")]
    Rejected {
        kind: EntityKind,
        name: String,
        status: u16,
        message: String,
    },

    #[error("connection lost after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    #[error("client closed")]
    ClientClosed,

    #[error("channel group '{group}' request failed: {reason}")]
    GroupAdmin { group: String, reason: String },

    #[error("leave request failed: {reason}")]
    Leave { reason: String },
}

impl SubscribeError {
    /// Entity name the error refers to, if it is entity scoped.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::AlreadySubscribed { name, .. }
            | Self::NotSubscribed { name, .. }
            | Self::EmptySubscriptionSet { name }
            | Self::Rejected { name, .. } => Some(name),
            Self::GroupAdmin { group, .. } => Some(group),
            Self::RetriesExhausted { .. } | Self::ClientClosed | Self::Leave { .. } => None,
        }
    }
}

/// Malformed service bodies.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timetoken: {0:?}")]
    InvalidTimetoken(String),
}
