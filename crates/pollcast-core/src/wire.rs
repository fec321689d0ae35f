//! JSON wire shapes of the subscribe service.
//!
//! Subscribe responses use the compact v2 layout:
//! `{"t":{"t":"<tt>","r":<region>},"m":[{"c":..,"b":..,"d":..,"p":{..},"i":..,"k":..}]}`.
//! Refusals carry a status/message body with an optional payload naming the
//! channels and groups involved.

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::types::{Envelope, EnvelopeEntry, Timetoken};

// ─── Constants ───────────────────────────────────────────────────────

/// Message the service uses when a subscribed group has no member channels.
pub const EMPTY_SUBSCRIPTION_SET: &str =
    "Channel group or groups result in empty subscription set";

/// Service name reported in leave responses.
pub const PRESENCE_SERVICE: &str = "Presence";

/// Service name reported by the channel-group registry.
pub const CHANNEL_REGISTRY_SERVICE: &str = "channel-registry";

// ─── Subscribe Body ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimetoken {
    #[serde(rename = "t")]
    pub value: String,
    #[serde(rename = "r", default)]
    pub region: u32,
}

impl WireTimetoken {
    pub fn decode(&self) -> Result<Timetoken, DecodeError> {
        Timetoken::parse(&self.value, self.region)
    }
}

impl From<Timetoken> for WireTimetoken {
    fn from(tt: Timetoken) -> Self {
        Self {
            value: tt.value.to_string(),
            region: tt.region,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "c")]
    pub channel: String,
    /// Subscription match: the group (or channel) the message matched.
    #[serde(rename = "b", default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(rename = "d")]
    pub payload: serde_json::Value,
    #[serde(rename = "p")]
    pub published: WireTimetoken,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub subscribe_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeBody {
    #[serde(rename = "t")]
    pub cursor: WireTimetoken,
    #[serde(rename = "m", default)]
    pub messages: Vec<WireMessage>,
}

impl SubscribeBody {
    /// Convert into an [`Envelope`], keeping message order.
    pub fn into_envelope(self) -> Result<Envelope, DecodeError> {
        let cursor = self.cursor.decode()?;
        let mut entries = Vec::with_capacity(self.messages.len());
        for msg in self.messages {
            let timetoken = msg.published.decode()?;
            // A match equal to the channel itself is a direct subscription.
            let group = msg.subscription.filter(|b| *b != msg.channel);
            entries.push(EnvelopeEntry {
                payload: msg.payload,
                channel: msg.channel,
                group,
                timetoken,
                issuer: msg.issuer,
            });
        }
        Ok(Envelope { entries, cursor })
    }
}

impl From<&Envelope> for SubscribeBody {
    fn from(envelope: &Envelope) -> Self {
        Self {
            cursor: envelope.cursor.into(),
            messages: envelope
                .entries
                .iter()
                .map(|e| WireMessage {
                    channel: e.channel.clone(),
                    subscription: e.group.clone(),
                    payload: e.payload.clone(),
                    published: e.timetoken.into(),
                    issuer: e.issuer.clone(),
                    subscribe_key: None,
                })
                .collect(),
        }
    }
}

/// Decode a successful subscribe response body.
pub fn decode_envelope(body: &[u8]) -> Result<Envelope, DecodeError> {
    let parsed: SubscribeBody = serde_json::from_slice(body)?;
    parsed.into_envelope()
}

// ─── Service Errors ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorPayload {
    #[serde(rename = "channel-groups", default, skip_serializing_if = "Vec::is_empty")]
    pub channel_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    pub status: u16,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ServiceErrorPayload>,
}

impl ServiceErrorBody {
    /// Refusal for groups that resolve to no member channels.
    pub fn empty_subscription_set(groups: Vec<String>) -> Self {
        Self {
            status: 400,
            error: true,
            message: EMPTY_SUBSCRIPTION_SET.to_string(),
            service: Some(CHANNEL_REGISTRY_SERVICE.to_string()),
            payload: Some(ServiceErrorPayload {
                channel_groups: groups,
                channels: Vec::new(),
            }),
        }
    }

    pub fn is_empty_subscription_set(&self) -> bool {
        self.message.contains(EMPTY_SUBSCRIPTION_SET)
    }

    /// Groups named in the payload (may be empty).
    pub fn groups(&self) -> &[String] {
        self.payload
            .as_ref()
            .map(|p| p.channel_groups.as_slice())
            .unwrap_or(&[])
    }
}

/// Decode a refusal body. Falls back to a bare status when the body is not
/// the usual JSON object.
pub fn decode_service_error(status: u16, body: &[u8]) -> ServiceErrorBody {
    serde_json::from_slice::<ServiceErrorBody>(body).unwrap_or_else(|_| ServiceErrorBody {
        status,
        error: true,
        message: String::from_utf8_lossy(body).trim().to_string(),
        service: None,
        payload: None,
    })
}

// ─── Leave / Admin Bodies ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveBody {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl LeaveBody {
    pub fn ok() -> Self {
        Self {
            status: 200,
            message: "OK".to_string(),
            action: Some("leave".to_string()),
            service: Some(PRESENCE_SERVICE.to_string()),
        }
    }
}

/// Acknowledgement body of the channel-group registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminBody {
    pub status: u16,
    pub message: String,
    pub service: String,
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl AdminBody {
    pub fn ok(payload: Option<serde_json::Value>) -> Self {
        Self {
            status: 200,
            message: "OK".to_string(),
            service: CHANNEL_REGISTRY_SERVICE.to_string(),
            error: false,
            payload,
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
