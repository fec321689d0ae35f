//! pollcast-subscribe: the subscription engine.
//!
//! One [`SubscribeClient`] owns a registry of channels and channel groups,
//! a single long-poll task multiplexed across all of them, and a dispatcher
//! that routes decoded messages and presence events to the listener of the
//! call that subscribed each entity.
//!
//! ```text
//! subscribe() → Registry ──wake──► poll loop ──► Transport
//!                   ▲                  │
//!                   └──── route ◄──────┘ ──► Listener sinks
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod dispatcher;
mod poll_loop;
pub mod presence;
pub mod registry;
pub mod sink;

pub use client::SubscribeClient;
pub use config::{ClientConfig, DeliveryPolicy};
pub use connection::ConnectionTracker;
pub use cursor::TimetokenCursor;
pub use registry::{EntityKey, Listener, Registry};
pub use sink::{DeliveryOutcome, Sink};

pub use pollcast_core::{
    ChannelEntity, ConnectionState, EntityKind, Notification, PresenceAction, PresenceEvent,
    SubscribeError, Timetoken,
};
