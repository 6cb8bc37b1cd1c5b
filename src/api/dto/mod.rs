//! Data Transfer Objects for REST request/response serialization.
//!
//! Publish request bodies are the message [`crate::domain::Payload`]
//! itself; the types here cover responses only.

pub mod relay_dto;

pub use relay_dto::*;
