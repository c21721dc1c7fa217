//! crossbus-page: The page-side client of the cross-context bus.
//!
//! Turns the request/response protocol into single-shot asynchronous
//! calls and delivers unsolicited events to persistent listeners.

pub mod client;

pub use client::PageClient;
