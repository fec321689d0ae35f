//! Presence derivation.
//!
//! Entries arriving on a presence companion carry an object payload:
//! `{"action":"join","uuid":"..","occupancy":2,"timestamp":..,"data":{..}}`.
//! Classification is by `action`; unknown actions pass through as state
//! changes. Nothing is deduplicated here.

use serde_json::Value;

use pollcast_core::types::{base_name, is_presence_name};
use pollcast_core::wire::LeaveBody;
use pollcast_core::{EnvelopeEntry, Notification, PresenceAction, PresenceEvent};

/// True if the entry was published on, or matched through, a companion.
pub fn is_presence_entry(entry: &EnvelopeEntry) -> bool {
    is_presence_name(&entry.channel) || entry.group.as_deref().is_some_and(is_presence_name)
}

/// Classify a presence entry. Returns `None` if the payload is not an object.
pub fn derive(entry: &EnvelopeEntry) -> Option<PresenceEvent> {
    let body = entry.payload.as_object()?;

    let action = body
        .get("action")
        .and_then(Value::as_str)
        .map(PresenceAction::from_action)
        .unwrap_or(PresenceAction::StateChange);
    let uuid = body
        .get("uuid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Some(PresenceEvent {
        action,
        uuid,
        occupancy: body.get("occupancy").and_then(Value::as_u64),
        timestamp: body.get("timestamp").and_then(Value::as_i64),
        state: body.get("data").cloned(),
        channel: base_name(&entry.channel).to_string(),
        group: entry.group.as_deref().map(|g| base_name(g).to_string()),
    })
}

/// Terminal notice after this client's own leave was acknowledged.
pub fn own_leave(
    uuid: &str,
    channels: Vec<String>,
    groups: Vec<String>,
    body: &LeaveBody,
) -> Notification {
    Notification::Leave {
        uuid: uuid.to_string(),
        status: body.status,
        message: body.message.clone(),
        channels,
        groups,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollcast_core::Timetoken;
    use serde_json::json;

    fn entry(payload: Value, channel: &str, group: Option<&str>) -> EnvelopeEntry {
        EnvelopeEntry {
            payload,
            channel: channel.into(),
            group: group.map(Into::into),
            timetoken: Timetoken::new(1, 0),
            issuer: None,
        }
    }

    #[test]
    fn join_through_group_companion() {
        let e = entry(
            json!({"action": "join", "uuid": "b", "occupancy": 1, "timestamp": 17}),
            "adsf-pnpres",
            Some("G-pnpres"),
        );
        assert!(is_presence_entry(&e));

        let event = derive(&e).unwrap();
        assert_eq!(event.action, PresenceAction::Join);
        assert_eq!(event.uuid, "b");
        assert_eq!(event.occupancy, Some(1));
        assert_eq!(event.timestamp, Some(17));
        assert_eq!(event.channel, "adsf");
        assert_eq!(event.group.as_deref(), Some("G"));
    }

    #[test]
    fn unknown_action_is_state_change() {
        let e = entry(
            json!({"action": "interval", "uuid": "x", "data": {"mood": "ok"}}),
            "lobby-pnpres",
            None,
        );
        let event = derive(&e).unwrap();
        assert_eq!(event.action, PresenceAction::StateChange);
        assert_eq!(event.state, Some(json!({"mood": "ok"})));
        assert_eq!(event.group, None);
    }

    #[test]
    fn leave_and_timeout_are_classified() {
        for (action, expected) in [
            ("leave", PresenceAction::Leave),
            ("timeout", PresenceAction::Timeout),
        ] {
            let e = entry(json!({"action": action, "uuid": "u"}), "c-pnpres", None);
            assert_eq!(derive(&e).unwrap().action, expected);
        }
    }

    #[test]
    fn non_object_payload_is_not_presence() {
        let e = entry(json!("hey"), "c-pnpres", None);
        assert!(derive(&e).is_none());
        assert!(!is_presence_entry(&entry(json!("hey"), "c", Some("g"))));
    }

    #[test]
    fn own_leave_copies_ack() {
        let n = own_leave("me", vec!["c".into()], vec![], &LeaveBody::ok());
        let wire = n.to_wire();
        assert_eq!(wire["action"], "leave");
        assert_eq!(wire["status"], 200);
        assert_eq!(wire["uuid"], "me");
        assert_eq!(wire["channels"], json!(["c"]));
    }
}
