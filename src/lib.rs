//! # task-relay
//!
//! Real-time relay that pushes task and project status changes from a
//! background job pipeline to connected WebSocket clients.
//!
//! Each connection owns a bounded mailbox drained by its own delivery
//! loop, so messages reach a client in the order they were published to
//! it, a slow client only loses its own oldest backlog, and a broken
//! socket never stalls delivery to anyone else.
//!
//! ## Architecture
//!
//! ```text
//! Producers (job engine, REST)      Clients (WebSocket)
//!     │                                  │
//!     ├── REST Handlers (api/)           ├── WS Handler (ws/)
//!     │                                  │
//!     └──────────────► Relay (service/) ◄┘
//!                        │
//!          ┌─────────────┼──────────────┐
//!   ConnectionRegistry   TopicIndex    Message
//!          │
//!   Mailbox + delivery loop ──► Transport (socket write half)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;
