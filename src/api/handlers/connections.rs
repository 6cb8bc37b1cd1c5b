//! Operator endpoints: connection listing, forced disconnect, topic
//! subscribers, relay counters.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{ConnectionDto, ConnectionListResponse, SubscribersResponse};
use crate::app_state::AppState;
use crate::domain::ConnectionId;
use crate::domain::topic_index::validate_topic;
use crate::error::{ErrorResponse, RelayError};
use crate::service::RelayStats;

/// `GET /connections` — List active connections.
#[utoipa::path(
    get,
    path = "/api/v1/connections",
    tag = "Connections",
    summary = "List active connections",
    description = "Returns every active connection with its mailbox counters and subscriptions.",
    responses(
        (status = 200, description = "Connection list", body = ConnectionListResponse),
    )
)]
pub async fn list_connections(State(state): State<AppState>) -> impl IntoResponse {
    let mut data = Vec::new();
    for info in state.relay.connections().await {
        let topics = state.relay.topics_of(&info.identity).await;
        data.push(ConnectionDto::new(info, topics.into_iter().collect()));
    }
    data.sort_by(|a, b| a.identity.cmp(&b.identity));

    Json(ConnectionListResponse {
        count: data.len(),
        data,
    })
}

/// `GET /connections/{identity}` — Inspect one connection.
///
/// # Errors
///
/// Returns [`RelayError::UnknownIdentity`] if `identity` is not connected.
#[utoipa::path(
    get,
    path = "/api/v1/connections/{identity}",
    tag = "Connections",
    summary = "Get connection details",
    params(
        ("identity" = String, Path, description = "Client identity"),
    ),
    responses(
        (status = 200, description = "Connection details", body = ConnectionDto),
        (status = 404, description = "Not connected", body = ErrorResponse),
    )
)]
pub async fn get_connection(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let identity = ConnectionId::parse(identity)?;
    let connection = state
        .relay
        .registry()
        .get(&identity)
        .await
        .ok_or_else(|| RelayError::UnknownIdentity(identity.to_string()))?;
    let topics = state.relay.topics_of(&identity).await;

    Ok(Json(ConnectionDto::new(
        connection.info(),
        topics.into_iter().collect(),
    )))
}

/// `DELETE /connections/{identity}` — Force a client off.
///
/// # Errors
///
/// Returns [`RelayError::UnknownIdentity`] if `identity` is not connected.
#[utoipa::path(
    delete,
    path = "/api/v1/connections/{identity}",
    tag = "Connections",
    summary = "Disconnect a client",
    description = "Stops the client's delivery loop, closes its socket, and drops its subscriptions.",
    params(
        ("identity" = String, Path, description = "Client identity"),
    ),
    responses(
        (status = 204, description = "Disconnected"),
        (status = 404, description = "Not connected", body = ErrorResponse),
    )
)]
pub async fn disconnect(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    let identity = ConnectionId::parse(identity)?;
    if state.relay.disconnect(&identity).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RelayError::UnknownIdentity(identity.to_string()))
    }
}

/// `GET /topics/{topic}/subscribers` — List a topic's subscribers.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for a blank topic.
#[utoipa::path(
    get,
    path = "/api/v1/topics/{topic}/subscribers",
    tag = "Connections",
    summary = "List topic subscribers",
    params(
        ("topic" = String, Path, description = "Topic name"),
    ),
    responses(
        (status = 200, description = "Subscribers", body = SubscribersResponse),
        (status = 400, description = "Invalid topic", body = ErrorResponse),
    )
)]
pub async fn topic_subscribers(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<impl IntoResponse, RelayError> {
    validate_topic(&topic)?;
    let mut subscribers: Vec<String> = state
        .relay
        .subscribers_of(&topic)
        .await
        .into_iter()
        .map(String::from)
        .collect();
    subscribers.sort();

    Ok(Json(SubscribersResponse {
        count: subscribers.len(),
        topic,
        subscribers,
    }))
}

/// `GET /stats` — Relay-wide counters.
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    tag = "Connections",
    summary = "Relay statistics",
    responses(
        (status = 200, description = "Counters", body = RelayStats),
    )
)]
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relay.stats().await)
}

/// Connection and topic inspection routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections))
        .route(
            "/connections/{identity}",
            get(get_connection).delete(disconnect),
        )
        .route("/topics/{topic}/subscribers", get(topic_subscribers))
        .route("/stats", get(stats))
}
