//! pollcast-core: shared types for the long-poll subscription engine.
//!
//! Entities, timetokens, envelopes, presence events, the tagged
//! [`Notification`] delivered to listener sinks, the error taxonomy, the
//! service's JSON wire shapes, and the collaborator traits ([`Transport`],
//! [`GroupAdmin`]) the engine is driven through. No async runtime here.

pub mod error;
pub mod notification;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{DecodeError, SubscribeError};
pub use notification::Notification;
pub use transport::{
    GroupAdmin, LeaveRequest, PollRequest, Transport, TransportError, TransportResponse,
};
pub use types::{
    ChannelEntity, ConnectionState, EntityKind, Envelope, EnvelopeEntry, PRESENCE_SUFFIX,
    PresenceAction, PresenceEvent, Timetoken,
};
