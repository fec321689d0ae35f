use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DecodeError;

// ─── Entity Names ─────────────────────────────────────────────────

/// Reserved suffix marking the presence companion of a channel or group.
pub const PRESENCE_SUFFIX: &str = "-pnpres";

/// True if `name` addresses a presence companion.
pub fn is_presence_name(name: &str) -> bool {
    name.len() > PRESENCE_SUFFIX.len() && name.ends_with(PRESENCE_SUFFIX)
}

/// Strip the presence suffix, if any.
pub fn base_name(name: &str) -> &str {
    if is_presence_name(name) {
        &name[..name.len() - PRESENCE_SUFFIX.len()]
    } else {
        name
    }
}

/// Presence companion name of `name` (idempotent).
pub fn presence_name(name: &str) -> String {
    if is_presence_name(name) {
        name.to_string()
    } else {
        format!("{name}{PRESENCE_SUFFIX}")
    }
}

/// Parse a comma-joined name list.
///
/// Whitespace around items is trimmed, empty items are dropped and
/// duplicates are removed while keeping first-seen order.
pub fn split_names(list: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for item in list.split(',') {
        let item = item.trim();
        if item.is_empty() || names.iter().any(|n| n == item) {
            continue;
        }
        names.push(item.to_string());
    }
    names
}

// ─── Entity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Channel,
    ChannelGroup,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::ChannelGroup => "channel group",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel or channel group known to the subscription registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntity {
    pub name: String,
    pub kind: EntityKind,
    /// Set once a poll covering this entity has succeeded.
    pub subscribed: bool,
}

impl ChannelEntity {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            subscribed: false,
        }
    }

    pub fn is_presence(&self) -> bool {
        is_presence_name(&self.name)
    }

    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }

    pub fn presence_name(&self) -> String {
        presence_name(&self.name)
    }
}

// ─── Timetoken ────────────────────────────────────────────────────

/// Opaque service cursor: where the next poll resumes.
///
/// The service encodes it as a 17-digit decimal string (unix time in
/// 100ns units). Ordering only considers `value`.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Timetoken {
    pub value: u64,
    pub region: u32,
}

impl Timetoken {
    /// Cursor used for a subscribe-from-scratch (handshake) poll.
    pub const ZERO: Self = Self {
        value: 0,
        region: 0,
    };

    pub fn new(value: u64, region: u32) -> Self {
        Self { value, region }
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Timetoken for a wall-clock instant (100ns units since the epoch).
    pub fn from_datetime(at: DateTime<Utc>, region: u32) -> Self {
        let nanos = at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
        Self {
            value: nanos / 100,
            region,
        }
    }

    /// Parse the service's string form with an accompanying region.
    pub fn parse(value: &str, region: u32) -> Result<Self, DecodeError> {
        let value = value
            .trim()
            .parse::<u64>()
            .map_err(|_| DecodeError::InvalidTimetoken(value.to_string()))?;
        Ok(Self { value, region })
    }
}

impl PartialEq for Timetoken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Timetoken {}

impl PartialOrd for Timetoken {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timetoken {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for Timetoken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl FromStr for Timetoken {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, 0)
    }
}

// ─── Envelope ─────────────────────────────────────────────────────

/// One decoded message of a poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeEntry {
    pub payload: serde_json::Value,
    /// Channel the message was published on.
    pub channel: String,
    /// Group through which the subscription matched, if any.
    pub group: Option<String>,
    pub timetoken: Timetoken,
    /// Publisher identity, when the service reports it.
    pub issuer: Option<String>,
}

/// A decoded poll response: entries in arrival order plus the next cursor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub entries: Vec<EnvelopeEntry>,
    pub cursor: Timetoken,
}

impl Envelope {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Connection ───────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Presence ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresenceAction {
    Join,
    Leave,
    Timeout,
    StateChange,
}

impl PresenceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Timeout => "timeout",
            Self::StateChange => "state-change",
        }
    }

    /// Classify a service action string. Unknown actions are state changes.
    pub fn from_action(action: &str) -> Self {
        match action {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "timeout" => Self::Timeout,
            _ => Self::StateChange,
        }
    }
}

impl fmt::Display for PresenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presence event derived from an entry on a presence companion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub action: PresenceAction,
    pub uuid: String,
    pub occupancy: Option<u64>,
    pub timestamp: Option<i64>,
    /// State payload carried by state-change events.
    pub state: Option<serde_json::Value>,
    /// Base channel name (suffix stripped).
    pub channel: String,
    /// Base group name, when delivered through a group subscription.
    pub group: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn presence_names() {
        assert!(is_presence_name("lobby-pnpres"));
        assert!(!is_presence_name("lobby"));
        assert!(!is_presence_name("-pnpres"));
        assert_eq!(base_name("lobby-pnpres"), "lobby");
        assert_eq!(base_name("lobby"), "lobby");
        assert_eq!(presence_name("lobby"), "lobby-pnpres");
        assert_eq!(presence_name("lobby-pnpres"), "lobby-pnpres");
    }

    #[test]
    fn split_names_trims_and_dedups() {
        assert_eq!(split_names("a, b,,a , c"), vec!["a", "b", "c"]);
        assert!(split_names("").is_empty());
        assert!(split_names(" , ").is_empty());
    }

    #[test]
    fn entity_kind_display() {
        assert_eq!(EntityKind::Channel.to_string(), "channel");
        assert_eq!(EntityKind::ChannelGroup.to_string(), "channel group");
    }

    #[test]
    fn channel_entity_presence_flag() {
        let e = ChannelEntity::new(EntityKind::ChannelGroup, "g-pnpres");
        assert!(e.is_presence());
        assert_eq!(e.base_name(), "g");
        assert!(!e.subscribed);
    }

    #[test]
    fn timetoken_parse_and_order() {
        let a = Timetoken::parse("15000000000000000", 4).unwrap();
        let b: Timetoken = "15000000000000001".parse().unwrap();
        assert!(a < b);
        assert_eq!(a.region, 4);
        assert_eq!(a.to_string(), "15000000000000000");
        assert!(Timetoken::parse("abc", 0).is_err());
        assert!(Timetoken::ZERO.is_zero());
    }

    #[test]
    fn timetoken_from_datetime_has_17_digits() {
        let at = DateTime::parse_from_rfc3339("2026-02-25T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc);
        let tt = Timetoken::from_datetime(at, 0);
        assert_eq!(tt.to_string().len(), 17);
        assert_eq!(tt.value % 10_000_000, 0);
    }

    #[test]
    fn timetoken_equality_ignores_region() {
        assert_eq!(Timetoken::new(7, 1), Timetoken::new(7, 2));
    }

    #[test]
    fn presence_action_classification() {
        assert_eq!(PresenceAction::from_action("join"), PresenceAction::Join);
        assert_eq!(PresenceAction::from_action("leave"), PresenceAction::Leave);
        assert_eq!(PresenceAction::from_action("timeout"), PresenceAction::Timeout);
        assert_eq!(
            PresenceAction::from_action("interval"),
            PresenceAction::StateChange
        );
        assert_eq!(PresenceAction::StateChange.as_str(), "state-change");
    }

    proptest! {
        #[test]
        fn split_names_never_yields_empty_or_duplicates(list in "[a-c ,]{0,24}") {
            let names = split_names(&list);
            for (i, n) in names.iter().enumerate() {
                prop_assert!(!n.is_empty());
                prop_assert_eq!(n.trim(), n.as_str());
                prop_assert!(!names[..i].contains(n));
            }
        }
    }
}
