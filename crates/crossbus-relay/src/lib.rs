//! crossbus-relay: The relay bridge of the cross-context bus.
//!
//! A stateless forwarding stage between the page transport and the
//! privileged backend link. It is not a party to the protocol: it
//! never correlates, deduplicates, or inspects content beyond
//! classifying envelopes.

pub mod bridge;

pub use bridge::RelayBridge;
