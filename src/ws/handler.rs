//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::ConnectionId;
use crate::error::RelayError;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Identity the client connects as.
    pub client_id: Option<String>,
}

/// `GET /ws?client_id=<identity>` — Upgrade HTTP connection to WebSocket.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] (400) if `client_id` is missing
/// or blank.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, RelayError> {
    let identity = ConnectionId::parse(params.client_id.unwrap_or_default())?;
    let relay = Arc::clone(&state.relay);

    Ok(ws.on_upgrade(move |socket| run_connection(socket, identity, relay)))
}
