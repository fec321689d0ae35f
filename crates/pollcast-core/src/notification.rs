//! Tagged sink items.
//!
//! Everything a listener receives is a [`Notification`], classified once at
//! dispatch time. [`Notification::to_wire`] renders the array shapes callers
//! match on, e.g. `[1, "Subscription to channel group 'G' connected", "G"]`.

use std::fmt;

use serde_json::{Value, json};

use crate::error::SubscribeError;
use crate::types::{EntityKind, PresenceEvent, Timetoken};

/// Status marker of successful notifications.
const OK_MARKER: u8 = 1;

/// Status marker of error notifications.
const ERROR_MARKER: u8 = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// First confirmed poll covering `name`.
    Connected { kind: EntityKind, name: String },
    /// `name` was removed by an unsubscribe call.
    Unsubscribed { kind: EntityKind, name: String },
    /// A published message.
    Data {
        payload: Value,
        channel: String,
        group: Option<String>,
        timetoken: Timetoken,
    },
    /// A presence event on a companion entity.
    Presence(PresenceEvent),
    /// The service acknowledged this client's own leave.
    Leave {
        uuid: String,
        status: u16,
        message: String,
        channels: Vec<String>,
        groups: Vec<String>,
    },
    /// Verbatim acknowledgement body of a collaborator request.
    Response(Value),
    Error(SubscribeError),
}

impl Notification {
    pub fn connected(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::Connected {
            kind,
            name: name.into(),
        }
    }

    pub fn unsubscribed(kind: EntityKind, name: impl Into<String>) -> Self {
        Self::Unsubscribed {
            kind,
            name: name.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Entity name the notification is about, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Connected { name, .. } | Self::Unsubscribed { name, .. } => Some(name),
            Self::Data { channel, .. } => Some(channel),
            Self::Presence(event) => Some(&event.channel),
            Self::Error(err) => err.name(),
            Self::Leave { .. } | Self::Response(_) => None,
        }
    }

    /// Render the JSON shape delivered to callers.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Connected { kind, name } => json!([
                OK_MARKER,
                format!("Subscription to {kind} '{name}' connected"),
                name
            ]),
            Self::Unsubscribed { kind, name } => json!([
                OK_MARKER,
                format!("Subscription to {kind} '{name}' unsubscribed"),
                name
            ]),
            Self::Data {
                payload,
                channel,
                group,
                ..
            } => tagged(payload.clone(), channel, group.as_deref()),
            Self::Presence(event) => {
                let mut body = json!({
                    "action": event.action.as_str(),
                    "uuid": event.uuid,
                });
                if let Some(occupancy) = event.occupancy {
                    body["occupancy"] = json!(occupancy);
                }
                if let Some(timestamp) = event.timestamp {
                    body["timestamp"] = json!(timestamp);
                }
                if let Some(ref state) = event.state {
                    body["data"] = state.clone();
                }
                tagged(body, &event.channel, event.group.as_deref())
            }
            Self::Leave {
                uuid,
                status,
                message,
                channels,
                groups,
            } => json!({
                "action": "leave",
                "status": status,
                "message": message,
                "service": crate::wire::PRESENCE_SERVICE,
                "uuid": uuid,
                "channels": channels,
                "channel-groups": groups,
            }),
            Self::Response(body) => body.clone(),
            Self::Error(err) => json!([
                ERROR_MARKER,
                err.to_string(),
                err.name().unwrap_or_default()
            ]),
        }
    }
}

fn tagged(body: Value, channel: &str, group: Option<&str>) -> Value {
    match group {
        Some(group) => json!([OK_MARKER, body, channel, group]),
        None => json!([OK_MARKER, body, channel]),
    }
}

impl From<SubscribeError> for Notification {
    fn from(err: SubscribeError) -> Self {
        Self::Error(err)
    }
}

/// Arrays render with `", "` separators; objects render compactly.
impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_wire() {
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            other => write!(f, "{other}"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PresenceAction;

    #[test]
    fn connected_renders_literal_shape() {
        let n = Notification::connected(EntityKind::ChannelGroup, "Group_A");
        assert_eq!(
            n.to_string(),
            "[1, \"Subscription to channel group 'Group_A' connected\", \"Group_A\"]"
        );
        assert_eq!(n.to_wire().as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn unsubscribed_renders_literal_shape() {
        let n = Notification::unsubscribed(EntityKind::ChannelGroup, "Group_A");
        assert_eq!(
            n.to_string(),
            "[1, \"Subscription to channel group 'Group_A' unsubscribed\", \"Group_A\"]"
        );
    }

    #[test]
    fn channel_notices_name_the_kind() {
        let n = Notification::connected(EntityKind::Channel, "news");
        assert_eq!(n.to_wire()[1], "Subscription to channel 'news' connected");
    }

    #[test]
    fn group_data_has_four_elements() {
        let n = Notification::Data {
            payload: json!("hey"),
            channel: "C".into(),
            group: Some("G".into()),
            timetoken: Timetoken::new(1, 0),
        };
        assert_eq!(n.to_wire(), json!([1, "hey", "C", "G"]));
        assert_eq!(n.to_string(), "[1, \"hey\", \"C\", \"G\"]");
    }

    #[test]
    fn direct_data_omits_group() {
        let n = Notification::Data {
            payload: json!({"k": "v"}),
            channel: "C".into(),
            group: None,
            timetoken: Timetoken::new(1, 0),
        };
        assert_eq!(n.to_wire(), json!([1, {"k": "v"}, "C"]));
    }

    #[test]
    fn presence_places_channel_and_group_positionally() {
        let n = Notification::Presence(PresenceEvent {
            action: PresenceAction::Join,
            uuid: "client-b".into(),
            occupancy: Some(2),
            timestamp: Some(1_700_000_000),
            state: None,
            channel: "adsf".into(),
            group: Some("G".into()),
        });
        let wire = n.to_wire();
        assert_eq!(wire[2], "adsf");
        assert_eq!(wire[3], "G");
        assert_eq!(wire[1]["action"], "join");
        assert_eq!(wire[1]["uuid"], "client-b");
        assert_eq!(wire[1]["occupancy"], 2);
        assert!(n.to_string().contains("join"));
    }

    #[test]
    fn error_renders_with_zero_marker() {
        let n: Notification = SubscribeError::NotSubscribed {
            kind: EntityKind::ChannelGroup,
            name: "g".into(),
        }
        .into();
        assert!(n.is_error());
        assert_eq!(
            n.to_wire(),
            json!([0, "Subscription to channel group 'g' not subscribed", "g"])
        );
        assert_eq!(n.name(), Some("g"));
    }

    #[test]
    fn leave_renders_object() {
        let n = Notification::Leave {
            uuid: "me".into(),
            status: 200,
            message: "OK".into(),
            channels: vec![],
            groups: vec!["g".into()],
        };
        let wire = n.to_wire();
        assert_eq!(wire["action"], "leave");
        assert_eq!(wire["status"], 200);
        assert_eq!(wire["uuid"], "me");
        assert!(n.to_string().starts_with('{'));
    }
}
