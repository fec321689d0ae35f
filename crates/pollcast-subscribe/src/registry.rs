//! Subscription registry: the set of subscribed channels and channel groups
//! and the listener bound to each of them.
//!
//! Every entity belongs to exactly one binding (the call that subscribed
//! it). The registry is the only state shared between public calls and the
//! poll loop; callers hold it under one mutex so adds, removes and the
//! loop's snapshot read are linearized.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::mpsc;

use pollcast_core::types::{base_name, is_presence_name, presence_name};
use pollcast_core::{ChannelEntity, EntityKind, Notification, SubscribeError, Timetoken};

use crate::sink::Sink;

// ─── Listener ────────────────────────────────────────────────────────

/// Success and error sinks of one public call.
#[derive(Debug, Clone)]
pub struct Listener {
    pub success: Sink,
    pub error: Sink,
}

impl Listener {
    pub fn new(success: Sink, error: Sink) -> Self {
        Self { success, error }
    }

    /// Create a listener together with its receiving ends.
    pub fn channel(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<Notification>,
        mpsc::Receiver<Notification>,
    ) {
        let (success, success_rx) = mpsc::channel(capacity.max(1));
        let (error, error_rx) = mpsc::channel(capacity.max(1));
        (Self { success, error }, success_rx, error_rx)
    }
}

// ─── Entity Key ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn channel(name: impl Into<String>) -> Self {
        Self::new(EntityKind::Channel, name)
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(EntityKind::ChannelGroup, name)
    }

    pub fn is_presence(&self) -> bool {
        is_presence_name(&self.name)
    }

    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    /// Presence companion of this entity.
    pub fn companion(&self) -> Self {
        Self::new(self.kind, presence_name(&self.name))
    }
}

// ─── Records ─────────────────────────────────────────────────────────

pub type BindingId = u64;

#[derive(Debug)]
struct Binding {
    listener: Listener,
    entities: BTreeSet<EntityKey>,
}

#[derive(Debug, Clone, Copy)]
struct EntityRecord {
    binding: BindingId,
    /// A poll covering this entity has succeeded.
    subscribed: bool,
    /// Timetoken of the handshake that confirmed it.
    since: Option<Timetoken>,
}

/// Consistent view of the registry taken at the start of a poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub channels: Vec<String>,
    pub groups: Vec<String>,
    /// Entities not yet confirmed by a successful poll.
    pub pending: Vec<EntityKey>,
    pub generation: u64,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.groups.is_empty()
    }
}

/// Result of [`Registry::remove`].
#[derive(Debug, Default)]
pub struct RemoveOutcome {
    /// Removed entities, including companions that vanished with their base.
    pub removed: Vec<EntityKey>,
    /// One `NotSubscribed` per requested key that was absent.
    pub missing: Vec<SubscribeError>,
}

// ─── Registry ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Registry {
    entities: BTreeMap<EntityKey, EntityRecord>,
    bindings: HashMap<BindingId, Binding>,
    next_binding: BindingId,
    /// Bumped on every structural change.
    generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `keys` to `listener`.
    ///
    /// All-or-nothing: if any key is already present, one
    /// `AlreadySubscribed` is returned per offending key and nothing changes.
    pub fn add(
        &mut self,
        keys: &[EntityKey],
        listener: Listener,
    ) -> Result<BindingId, Vec<SubscribeError>> {
        let conflicts: Vec<SubscribeError> = keys
            .iter()
            .filter(|k| self.entities.contains_key(*k))
            .map(|k| SubscribeError::AlreadySubscribed {
                kind: k.kind,
                name: k.name.clone(),
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(conflicts);
        }

        let id = self.next_binding;
        self.next_binding += 1;

        let mut entities = BTreeSet::new();
        for key in keys {
            self.entities.insert(
                key.clone(),
                EntityRecord {
                    binding: id,
                    subscribed: false,
                    since: None,
                },
            );
            entities.insert(key.clone());
        }
        self.bindings.insert(id, Binding { listener, entities });
        self.generation += 1;
        Ok(id)
    }

    /// Remove `keys`.
    ///
    /// A presence companion bound by the same call as its base is removed
    /// along with the base. Absent keys are reported, present ones removed.
    pub fn remove(&mut self, keys: &[EntityKey]) -> RemoveOutcome {
        let mut outcome = RemoveOutcome::default();

        for key in keys {
            if outcome.removed.contains(key) {
                continue;
            }
            let Some(record) = self.entities.remove(key) else {
                outcome.missing.push(SubscribeError::NotSubscribed {
                    kind: key.kind,
                    name: key.name.clone(),
                });
                continue;
            };
            self.unbind(record.binding, key);
            outcome.removed.push(key.clone());

            if !key.is_presence() {
                let companion = key.companion();
                if self
                    .entities
                    .get(&companion)
                    .is_some_and(|r| r.binding == record.binding)
                {
                    self.entities.remove(&companion);
                    self.unbind(record.binding, &companion);
                    outcome.removed.push(companion);
                }
            }
        }

        if !outcome.removed.is_empty() {
            self.generation += 1;
        }
        outcome
    }

    /// Drop a single entity the service refused. Returns its listener.
    pub fn reject(&mut self, key: &EntityKey) -> Option<Listener> {
        let record = self.entities.remove(key)?;
        let listener = self.bindings.get(&record.binding)?.listener.clone();
        self.unbind(record.binding, key);
        self.generation += 1;
        Some(listener)
    }

    /// Remove everything, returning one listener per binding.
    pub fn drain(&mut self) -> Vec<Listener> {
        let mut ids: Vec<BindingId> = self.bindings.keys().copied().collect();
        ids.sort_unstable();
        let listeners = ids
            .into_iter()
            .filter_map(|id| self.bindings.remove(&id))
            .map(|b| b.listener)
            .collect();
        if !self.entities.is_empty() {
            self.generation += 1;
        }
        self.entities.clear();
        listeners
    }

    fn unbind(&mut self, id: BindingId, key: &EntityKey) {
        if let Some(binding) = self.bindings.get_mut(&id) {
            binding.entities.remove(key);
            if binding.entities.is_empty() {
                self.bindings.remove(&id);
            }
        }
    }

    /// Mark `keys` as confirmed by the handshake answered at `since`.
    ///
    /// Returns the keys that were still present and not yet confirmed, with
    /// their listeners, in key order.
    pub fn mark_connected(
        &mut self,
        keys: &[EntityKey],
        since: Timetoken,
    ) -> Vec<(EntityKey, Listener)> {
        let mut confirmed = Vec::new();
        for key in keys {
            let Some(record) = self.entities.get_mut(key) else {
                continue;
            };
            if record.subscribed {
                continue;
            }
            record.subscribed = true;
            record.since = Some(since);
            if let Some(binding) = self.bindings.get(&record.binding) {
                confirmed.push((key.clone(), binding.listener.clone()));
            }
        }
        confirmed
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn listener(&self, key: &EntityKey) -> Option<&Listener> {
        let record = self.entities.get(key)?;
        self.bindings.get(&record.binding).map(|b| &b.listener)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Handshake timetoken `key` was confirmed at. Entries published at or
    /// before it predate the subscription.
    pub fn connected_since(&self, key: &EntityKey) -> Option<Timetoken> {
        self.entities.get(key).and_then(|r| r.since)
    }

    pub fn is_subscribed(&self, key: &EntityKey) -> bool {
        self.entities.get(key).is_some_and(|r| r.subscribed)
    }

    pub fn current_set(&self) -> Vec<ChannelEntity> {
        self.entities
            .iter()
            .map(|(key, record)| ChannelEntity {
                name: key.name.clone(),
                kind: key.kind,
                subscribed: record.subscribed,
            })
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot {
            generation: self.generation,
            ..Snapshot::default()
        };
        for (key, record) in &self.entities {
            match key.kind {
                EntityKind::Channel => snapshot.channels.push(key.name.clone()),
                EntityKind::ChannelGroup => snapshot.groups.push(key.name.clone()),
            }
            if !record.subscribed {
                snapshot.pending.push(key.clone());
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
