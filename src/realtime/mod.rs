//! Real-time channel: per-recipient WebSocket groups.
//!
//! The publisher turns an envelope into one invocation frame per recipient
//! group; a [`GroupTransport`] carries the frame to the group's members,
//! either directly (local) or through a Redis backplane shared by every
//! instance.

mod backplane;
mod hub;
mod message;
mod publisher;
mod registry;
mod transport;

pub use backplane::BackplaneSubscriber;
pub use hub::{authenticate, hub_handler, HubQuery};
pub use message::{ClientMessage, GroupFrame, OutboundMessage, ServerMessage};
pub use publisher::{group_name, WebNotificationPublisher};
pub use registry::{ConnectionHandle, GroupRegistry, RegistryStats};
pub use transport::{GroupTransport, LocalGroupTransport, RedisGroupTransport, TransportError};
