//! WebSocket layer: upgrade handling, socket transport, client commands.
//!
//! The WebSocket endpoint at `/ws` registers each socket with the relay
//! and lets the client manage its topic subscriptions.

pub mod connection;
pub mod handler;
pub mod messages;
