//! Relay service: the public entry point producers publish through.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::RelayOptions;
use crate::domain::{
    Connection, ConnectionId, ConnectionInfo, ConnectionRegistry, EnqueueOutcome, Message,
    TopicIndex, Transport,
};

/// Relay-wide counters.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct RelayStats {
    /// Currently registered connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Publish calls (personal, broadcast, topic) accepted.
    pub messages_published: u64,
    /// Mailbox enqueues performed across all fan-outs.
    pub deliveries_enqueued: u64,
    /// Messages dropped by the drop-oldest mailbox policy.
    pub evictions: u64,
    /// Connections torn down after a transport write failed.
    pub transport_failures: u64,
    /// Configured mailbox capacity.
    pub mailbox_capacity: usize,
}

/// Orchestrates connection lifecycle, subscriptions, and fan-out.
///
/// Owns the [`ConnectionRegistry`] and [`TopicIndex`] for its lifetime;
/// all state is in-memory and rebuilt as clients reconnect.
///
/// Publishing never fails from the caller's point of view: unknown or
/// departed recipients are skipped, and each recipient's mailbox absorbs
/// overflow on its own, so one slow or broken connection cannot hold up
/// the others.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicIndex>,
    published: AtomicU64,
    enqueued: AtomicU64,
    evictions: AtomicU64,
}

impl Relay {
    /// Creates a relay. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(options: RelayOptions) -> Self {
        let topics = Arc::new(TopicIndex::new());
        let registry = ConnectionRegistry::new(
            Arc::clone(&topics),
            options.mailbox_capacity,
            options.disconnect_timeout,
        );
        Self {
            registry,
            topics,
            published: AtomicU64::new(0),
            enqueued: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the inner [`ConnectionRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the inner [`TopicIndex`].
    #[must_use]
    pub fn topics(&self) -> &Arc<TopicIndex> {
        &self.topics
    }

    /// Registers `identity` on `transport`, replacing any live connection
    /// of the same identity.
    pub async fn connect<T: Transport>(
        &self,
        identity: ConnectionId,
        transport: T,
    ) -> Arc<Connection> {
        self.registry.connect(identity, Box::new(transport)).await
    }

    /// Disconnects `identity`. No-op if it is not connected.
    pub async fn disconnect(&self, identity: &ConnectionId) -> bool {
        self.registry.disconnect(identity).await
    }

    /// Disconnects `identity` only if `session` is still its live connection.
    pub async fn disconnect_session(&self, identity: &ConnectionId, session: Uuid) -> bool {
        self.registry.disconnect_session(identity, session).await
    }

    /// Queues `message` for a single identity.
    ///
    /// Returns `false`, without error, if the identity is not connected.
    pub async fn send_personal(
        &self,
        identity: &ConnectionId,
        message: impl Into<Message>,
    ) -> bool {
        let message = Arc::new(message.into());
        self.published.fetch_add(1, Ordering::Relaxed);
        let Some(connection) = self.registry.get(identity).await else {
            tracing::debug!(
                %identity,
                kind = message.kind(),
                "personal send to unknown identity ignored"
            );
            return false;
        };
        self.deliver(&connection, &message)
    }

    /// Queues `message` for every active connection, returning how many
    /// mailboxes accepted it.
    pub async fn broadcast(&self, message: impl Into<Message>) -> usize {
        let message = Arc::new(message.into());
        self.published.fetch_add(1, Ordering::Relaxed);
        let recipients = self
            .registry
            .active()
            .await
            .iter()
            .filter(|connection| self.deliver(connection, &message))
            .count();
        tracing::debug!(kind = message.kind(), recipients, "broadcast");
        recipients
    }

    /// Queues `message` for the current subscribers of `topic`, returning
    /// how many mailboxes accepted it.
    pub async fn broadcast_to_topic(&self, topic: &str, message: impl Into<Message>) -> usize {
        let message = Arc::new(message.into());
        self.published.fetch_add(1, Ordering::Relaxed);
        let recipients = self
            .registry
            .topic_subscribers(topic)
            .await
            .iter()
            .filter(|connection| self.deliver(connection, &message))
            .count();
        tracing::debug!(topic, kind = message.kind(), recipients, "topic broadcast");
        recipients
    }

    /// Queues a reply to a client command on the connection that sent it.
    ///
    /// Counted like any other delivery but not as a publish.
    pub fn reply(&self, connection: &Connection, message: impl Into<Message>) -> bool {
        self.deliver(connection, &Arc::new(message.into()))
    }

    /// Subscribes a connected identity to `topic`.
    ///
    /// Returns `false` if the identity has no active connection.
    pub async fn subscribe(&self, identity: &ConnectionId, topic: &str) -> bool {
        match self.registry.subscribe(identity, topic).await {
            Some(added) => {
                tracing::info!(%identity, topic, added, "subscribed to topic");
                true
            }
            None => {
                tracing::debug!(%identity, topic, "subscribe from unknown identity ignored");
                false
            }
        }
    }

    /// Unsubscribes a connected identity from `topic`.
    ///
    /// Returns `false` if the identity has no active connection.
    pub async fn unsubscribe(&self, identity: &ConnectionId, topic: &str) -> bool {
        match self.registry.unsubscribe(identity, topic).await {
            Some(removed) => {
                tracing::info!(%identity, topic, removed, "unsubscribed from topic");
                true
            }
            None => false,
        }
    }

    /// Returns the identities subscribed to `topic`.
    pub async fn subscribers_of(&self, topic: &str) -> HashSet<ConnectionId> {
        self.topics.subscribers_of(topic).await
    }

    /// Returns the topics `identity` is subscribed to.
    pub async fn topics_of(&self, identity: &ConnectionId) -> HashSet<String> {
        self.topics.topics_of(identity).await
    }

    /// Returns the number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Returns the number of subscribers of `topic`.
    pub async fn topic_subscriber_count(&self, topic: &str) -> usize {
        self.topics.subscriber_count(topic).await
    }

    /// Returns snapshots of all active connections.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry
            .active()
            .await
            .iter()
            .map(|connection| connection.info())
            .collect()
    }

    /// Returns relay-wide counters.
    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.registry.len().await,
            topics: self.topics.topic_count().await,
            messages_published: self.published.load(Ordering::Relaxed),
            deliveries_enqueued: self.enqueued.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            transport_failures: self.registry.transport_failures(),
            mailbox_capacity: self.registry.mailbox_capacity(),
        }
    }

    /// Disconnects every client. Used on server shutdown.
    pub async fn shutdown(&self) -> usize {
        let closed = self.registry.disconnect_all().await;
        tracing::info!(closed, "relay shut down");
        closed
    }

    fn deliver(&self, connection: &Connection, message: &Arc<Message>) -> bool {
        match connection.enqueue(Arc::clone(message)) {
            EnqueueOutcome::Queued => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            EnqueueOutcome::QueuedWithEviction => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                true
            }
            EnqueueOutcome::Closed => {
                tracing::debug!(identity = %connection.identity(), "skipping closed connection");
                false
            }
        }
    }
}
