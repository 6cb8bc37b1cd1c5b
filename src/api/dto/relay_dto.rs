//! DTOs for publish, subscription, and connection endpoints.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{ConnectionInfo, ConnectionState};

/// Response body for the publish endpoints (202 Accepted).
#[derive(Debug, Serialize, ToSchema)]
pub struct PublishResponse {
    /// Wire kind of the published message.
    pub kind: String,
    /// Number of mailboxes the message was queued into.
    pub recipients: usize,
}

/// Response body for `GET /topics/{topic}/subscribers`.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscribersResponse {
    /// Topic name echoed from the path.
    pub topic: String,
    /// Number of subscribers.
    pub count: usize,
    /// Subscriber identities, sorted.
    pub subscribers: Vec<String>,
}

/// One entry of `GET /connections`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionDto {
    /// Client identity.
    pub identity: String,
    /// Server-assigned session.
    pub session: Uuid,
    /// Connect time.
    pub connected_at: DateTime<Utc>,
    /// Lifecycle state (`active`, ...).
    pub state: String,
    /// Mailbox capacity.
    pub capacity: usize,
    /// Messages waiting in the mailbox.
    pub queued: usize,
    /// Messages written to the socket.
    pub delivered: u64,
    /// Messages dropped by drop-oldest.
    pub evicted: u64,
    /// Topics this connection is subscribed to, sorted.
    pub topics: Vec<String>,
}

impl ConnectionDto {
    /// Builds the DTO from a registry snapshot and its subscriptions.
    #[must_use]
    pub fn new(info: ConnectionInfo, mut topics: Vec<String>) -> Self {
        topics.sort();
        let state = match info.state {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Closed => "closed",
        };
        Self {
            identity: info.identity.into(),
            session: info.session,
            connected_at: info.connected_at,
            state: state.to_string(),
            capacity: info.mailbox.capacity,
            queued: info.mailbox.queued,
            delivered: info.mailbox.delivered,
            evicted: info.mailbox.evicted,
            topics,
        }
    }
}

/// Response body for `GET /connections`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionListResponse {
    /// Number of active connections.
    pub count: usize,
    /// Connection snapshots, sorted by identity.
    pub data: Vec<ConnectionDto>,
}
