//! Publish handlers: the HTTP surface producers push events through.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::PublishResponse;
use crate::app_state::AppState;
use crate::domain::topic_index::validate_topic;
use crate::domain::{ConnectionId, Message, Payload};
use crate::error::{ErrorResponse, RelayError};

/// `POST /connections/{identity}/messages` — Send to one client.
///
/// An identity that is not connected is not an error: the message is
/// dropped and `recipients` is 0.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for a blank identity and
/// [`RelayError::InvalidMessage`] for a malformed body.
#[utoipa::path(
    post,
    path = "/api/v1/connections/{identity}/messages",
    tag = "Publish",
    summary = "Send a message to one client",
    description = "Queues the message in the mailbox of the client connected as `identity`. Unknown identities are ignored.",
    params(
        ("identity" = String, Path, description = "Client identity"),
    ),
    request_body = Payload,
    responses(
        (status = 202, description = "Message accepted", body = PublishResponse),
        (status = 400, description = "Invalid identity or message", body = ErrorResponse),
    )
)]
pub async fn send_personal(
    State(state): State<AppState>,
    Path(identity): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let identity = ConnectionId::parse(identity)?;
    let message = parse_message(body)?;
    let kind = message.kind();

    let recipients = usize::from(state.relay.send_personal(&identity, message).await);
    Ok(accepted(kind, recipients))
}

/// `POST /broadcast` — Send to every connected client.
///
/// # Errors
///
/// Returns [`RelayError::InvalidMessage`] for a malformed body.
#[utoipa::path(
    post,
    path = "/api/v1/broadcast",
    tag = "Publish",
    summary = "Broadcast a message to all clients",
    description = "Queues the message in every active connection's mailbox.",
    request_body = Payload,
    responses(
        (status = 202, description = "Message accepted", body = PublishResponse),
        (status = 400, description = "Invalid message", body = ErrorResponse),
    )
)]
pub async fn broadcast(
    State(state): State<AppState>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    let message = parse_message(body)?;
    let kind = message.kind();

    let recipients = state.relay.broadcast(message).await;
    Ok(accepted(kind, recipients))
}

/// `POST /topics/{topic}/messages` — Send to a topic's subscribers.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] for a blank topic and
/// [`RelayError::InvalidMessage`] for a malformed body.
#[utoipa::path(
    post,
    path = "/api/v1/topics/{topic}/messages",
    tag = "Publish",
    summary = "Publish a message to a topic",
    description = "Queues the message in the mailbox of every client subscribed to `topic` at call time.",
    params(
        ("topic" = String, Path, description = "Topic name"),
    ),
    request_body = Payload,
    responses(
        (status = 202, description = "Message accepted", body = PublishResponse),
        (status = 400, description = "Invalid topic or message", body = ErrorResponse),
    )
)]
pub async fn publish_to_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    body: Result<Json<Payload>, JsonRejection>,
) -> Result<impl IntoResponse, RelayError> {
    validate_topic(&topic)?;
    let message = parse_message(body)?;
    let kind = message.kind();

    let recipients = state.relay.broadcast_to_topic(&topic, message).await;
    Ok(accepted(kind, recipients))
}

/// Turns a JSON body into a timestamped message, mapping extractor
/// rejections (bad JSON, unknown kind, progress out of range) to 400.
fn parse_message(body: Result<Json<Payload>, JsonRejection>) -> Result<Message, RelayError> {
    let Json(payload) =
        body.map_err(|rejection| RelayError::InvalidMessage(rejection.body_text()))?;
    Ok(Message::new(payload))
}

fn accepted(kind: &str, recipients: usize) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            kind: kind.to_string(),
            recipients,
        }),
    )
}

/// Publish routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/connections/{identity}/messages", post(send_personal))
        .route("/broadcast", post(broadcast))
        .route("/topics/{topic}/messages", post(publish_to_topic))
}
