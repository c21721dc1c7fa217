//! crossbus-hub: The trusted backend of the cross-context bus.
//!
//! Authoritative request handling plus peer-filtered event broadcast,
//! gated by an externally persisted allowlist.

pub mod allowlist;
pub mod hub;

pub use allowlist::{Allowlist, AllowlistStore, MemoryStores, SelectedAccountStore};
pub use hub::{BackendHub, BroadcastOptions};
