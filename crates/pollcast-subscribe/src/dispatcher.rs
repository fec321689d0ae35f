//! Envelope dispatcher: routes decoded entries to the listener that owns
//! the entity they matched.
//!
//! Routing runs under the registry lock and only builds [`Delivery`]
//! values; the sends happen afterwards without the lock.

use pollcast_core::{Envelope, EnvelopeEntry, Notification};

use crate::presence;
use crate::registry::{EntityKey, Registry};
use crate::sink::Delivery;

/// Output of one routing pass.
#[derive(Debug, Default)]
pub struct Routed {
    pub deliveries: Vec<Delivery>,
    /// Entries with no matching entity (e.g. removed since the poll began).
    pub unrouted: usize,
    /// Entries published before their entity's handshake.
    pub stale: usize,
}

/// Entity an entry belongs to. A group match wins over the channel.
fn target(registry: &Registry, entry: &EnvelopeEntry) -> Option<EntityKey> {
    if let Some(group) = &entry.group {
        let key = EntityKey::group(group.clone());
        if registry.contains(&key) {
            return Some(key);
        }
    }
    let key = EntityKey::channel(entry.channel.clone());
    registry.contains(&key).then_some(key)
}

/// Entry was published before `key` was confirmed. A poll resumed from an
/// older cursor replays those for entities added later.
///
/// The confirming handshake may itself publish the client's own join at
/// the returned timetoken, so presence keeps entries equal to it.
fn predates(registry: &Registry, key: &EntityKey, entry: &EnvelopeEntry) -> bool {
    let Some(since) = registry.connected_since(key) else {
        return false;
    };
    if presence::is_presence_entry(entry) {
        entry.timetoken < since
    } else {
        entry.timetoken <= since
    }
}

/// Classify an entry for the entity it routed to.
fn classify(key: &EntityKey, entry: EnvelopeEntry) -> Notification {
    if key.is_presence() {
        if let Some(event) = presence::derive(&entry) {
            return Notification::Presence(event);
        }
    }
    Notification::Data {
        payload: entry.payload,
        channel: entry.channel,
        group: entry.group,
        timetoken: entry.timetoken,
    }
}

/// Route every entry of `envelope`, preserving arrival order.
pub fn route(registry: &Registry, envelope: Envelope) -> Routed {
    let mut routed = Routed::default();
    for entry in envelope.entries {
        let Some(key) = target(registry, &entry) else {
            tracing::debug!(
                channel = %entry.channel,
                group = ?entry.group,
                "no subscriber for entry"
            );
            routed.unrouted += 1;
            continue;
        };
        if predates(registry, &key, &entry) {
            tracing::trace!(
                channel = %entry.channel,
                timetoken = %entry.timetoken,
                "entry predates subscription"
            );
            routed.stale += 1;
            continue;
        }
        let Some(listener) = registry.listener(&key) else {
            routed.unrouted += 1;
            continue;
        };
        let sink = listener.success.clone();
        routed.deliveries.push(Delivery {
            sink,
            notification: classify(&key, entry),
        });
    }
    routed
}
