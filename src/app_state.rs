//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::Relay;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Relay for connection management and fan-out.
    pub relay: Arc<Relay>,
}
