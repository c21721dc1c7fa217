//! crossbus-core: Shared protocol library for the cross-context bus.
//!
//! Provides the envelope model, the subscription registry every node
//! role builds on, error types, the port traits through which the bus
//! touches its host environment, and in-process channel endpoints for
//! same-process wiring.

pub mod error;
pub mod mem;
pub mod message;
pub mod port;
pub mod registry;

// Re-export commonly used items at crate root.
pub use error::{BusError, BusResult};
pub use message::{EventType, Message, RequestType, PROTOCOL_MARKER};
pub use port::{
    AccountAddress, HubInbound, HubLink, PagePost, PeerDirectory, PeerFilter, PeerId, PeerRef,
    Reply, ReplyResult,
};
pub use registry::{Delivery, DeliveryMode, Subscription, SubscriptionId, SubscriptionRegistry};
