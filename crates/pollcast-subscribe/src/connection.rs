//! Connection state tracker and the synthetic connected / unsubscribed
//! notices.
//!
//! State lives in a `watch` channel so callers can await transitions.
//! Only the poll loop and `close()` drive it.

use thiserror::Error;
use tokio::sync::watch;

use pollcast_core::{ConnectionState, Notification};

use crate::registry::{EntityKey, Listener};
use crate::sink::Delivery;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal connection transition: {from} -> {to}")]
    Illegal {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("connection tracker closed")]
    Closed,
}

/// Whether `from -> to` is a legal transition. Self-transitions are legal.
pub fn is_legal(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;
    from == to
        || matches!(
            (from, to),
            (Disconnected, Connecting)
                | (Connecting, Connected | Reconnecting | Disconnected)
                | (Connected, Reconnecting | Disconnected)
                | (Reconnecting, Connected | Disconnected)
        )
}

#[derive(Debug)]
pub struct ConnectionTracker {
    state: watch::Sender<ConnectionState>,
    closed: bool,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(
        &mut self,
        next: ConnectionState,
    ) -> Result<ConnectionState, TransitionError> {
        if self.closed {
            return Err(TransitionError::Closed);
        }
        let prev = self.state();
        if prev == next {
            return Ok(prev);
        }
        if !is_legal(prev, next) {
            return Err(TransitionError::Illegal {
                from: prev,
                to: next,
            });
        }
        self.state.send_replace(next);
        tracing::debug!(from = %prev, to = %next, "connection state");
        Ok(prev)
    }

    /// Force Disconnected and refuse further transitions.
    pub fn close(&mut self) {
        if !self.closed {
            self.state.send_replace(ConnectionState::Disconnected);
            self.closed = true;
        }
    }
}

// ─── Synthetic Notices ───────────────────────────────────────────────

/// One Connected notice per newly confirmed entity, to its success sink.
pub fn connected_notices(confirmed: &[(EntityKey, Listener)]) -> Vec<Delivery> {
    confirmed
        .iter()
        .map(|(key, listener)| {
            Delivery::new(
                &listener.success,
                Notification::connected(key.kind, key.name.clone()),
            )
        })
        .collect()
}

/// One Unsubscribed notice per removed entity, to `listener`.
pub fn unsubscribed_notices(removed: &[EntityKey], listener: &Listener) -> Vec<Delivery> {
    removed
        .iter()
        .map(|key| {
            Delivery::new(
                &listener.success,
                Notification::unsubscribed(key.kind, key.name.clone()),
            )
        })
        .collect()
}
