//! Service layer: relay orchestration.
//!
//! [`Relay`] is the entry point producers and the transport layer call:
//! connect/disconnect, subscribe/unsubscribe, and the three publish
//! operations.

pub mod relay;

pub use relay::{Relay, RelayStats};
