//! Live connection storage and lifecycle management.
//!
//! [`ConnectionRegistry`] maps each [`ConnectionId`] to its single live
//! [`Connection`]. Every lifecycle mutation (connect, disconnect, purge of
//! subscriptions) happens while holding the registry's write lock, so a
//! racing connect and disconnect for the same identity are serialized and
//! the topic index never keeps subscriptions for a departed connection.
//!
//! Waiting for a detached connection's delivery loop to stop happens after
//! the lock is released and is bounded by the configured disconnect
//! timeout; a loop that overruns it is aborted.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──► Active ──► Disconnecting ──► Closed
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::mailbox::{
    DeliveryFailure, DeliveryTask, EnqueueOutcome, Mailbox, MailboxStats, Transport,
    spawn_delivery,
};
use super::{ConnectionId, Message, TopicIndex};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Created, delivery loop not yet running.
    Connecting,
    /// Registered and accepting messages.
    Active,
    /// Detached from the registry; delivery loop being stopped.
    Disconnecting,
    /// Delivery loop gone and transport released.
    Closed,
}

/// Serializable snapshot of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Client identity.
    pub identity: ConnectionId,
    /// Server-assigned session of this particular connection.
    pub session: Uuid,
    /// When the connection became active.
    pub connected_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Mailbox counters.
    pub mailbox: MailboxStats,
}

/// One client connection: identity, mailbox, and delivery loop.
#[derive(Debug)]
pub struct Connection {
    identity: ConnectionId,
    session: Uuid,
    connected_at: DateTime<Utc>,
    mailbox: Arc<Mailbox>,
    state: Mutex<ConnectionState>,
    delivery: Mutex<Option<DeliveryTask>>,
}

impl Connection {
    fn new(identity: ConnectionId, mailbox_capacity: usize) -> Self {
        let mailbox = Arc::new(Mailbox::new(identity.clone(), mailbox_capacity));
        Self {
            identity,
            session: Uuid::new_v4(),
            connected_at: Utc::now(),
            mailbox,
            state: Mutex::new(ConnectionState::Connecting),
            delivery: Mutex::new(None),
        }
    }

    /// Returns the client identity.
    #[must_use]
    pub fn identity(&self) -> &ConnectionId {
        &self.identity
    }

    /// Returns the session distinguishing this connection from earlier or
    /// later connections of the same identity.
    #[must_use]
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Returns when the connection was created.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns the connection's mailbox.
    #[must_use]
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Returns `true` while the connection accepts messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Queues a message for delivery. Non-active connections discard it.
    pub fn enqueue(&self, message: Arc<Message>) -> EnqueueOutcome {
        if !self.is_active() {
            return EnqueueOutcome::Closed;
        }
        self.mailbox.enqueue(message)
    }

    /// Returns a serializable snapshot.
    #[must_use]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            identity: self.identity.clone(),
            session: self.session,
            connected_at: self.connected_at,
            state: self.state(),
            mailbox: self.mailbox.stats(),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    fn take_delivery(&self) -> Option<DeliveryTask> {
        lock(&self.delivery).take()
    }
}

/// Central store for all live connections.
///
/// Created with [`ConnectionRegistry::new`], which also starts a background
/// task that disconnects connections whose transport failed.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    topics: Arc<TopicIndex>,
    mailbox_capacity: usize,
    disconnect_timeout: Duration,
    failures: mpsc::UnboundedSender<DeliveryFailure>,
    transport_failures: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry sharing `topics` for subscription purges.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        topics: Arc<TopicIndex>,
        mailbox_capacity: usize,
        disconnect_timeout: Duration,
    ) -> Arc<Self> {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            topics,
            mailbox_capacity: mailbox_capacity.max(1),
            disconnect_timeout,
            failures,
            transport_failures: AtomicU64::new(0),
        });
        tokio::spawn(reap_failed(Arc::downgrade(&registry), failures_rx));
        registry
    }

    /// Registers a new connection for `identity` and starts its delivery
    /// loop.
    ///
    /// An existing connection for the same identity is detached first and
    /// its subscriptions dropped; this call returns only after the old
    /// delivery loop has terminated (or been aborted on timeout).
    pub async fn connect(
        &self,
        identity: ConnectionId,
        transport: Box<dyn Transport>,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(identity.clone(), self.mailbox_capacity));

        let displaced = {
            let mut map = self.connections.write().await;
            let displaced = map.remove(&identity);
            if let Some(old) = &displaced {
                self.detach(old).await;
            }

            let task = spawn_delivery(
                Arc::clone(connection.mailbox()),
                transport,
                connection.session(),
                self.failures.clone(),
            );
            *lock(&connection.delivery) = Some(task);
            connection.set_state(ConnectionState::Active);
            map.insert(identity.clone(), Arc::clone(&connection));
            displaced
        };

        tracing::info!(
            %identity,
            session = %connection.session(),
            replaced = displaced.is_some(),
            "client connected"
        );

        if let Some(old) = displaced {
            tracing::info!(%identity, session = %old.session(), "replacing previous connection");
            self.finish_disconnect(&old).await;
        }
        connection
    }

    /// Disconnects `identity`. Returns `false` if it had no live connection.
    pub async fn disconnect(&self, identity: &ConnectionId) -> bool {
        let detached = {
            let mut map = self.connections.write().await;
            let Some(connection) = map.remove(identity) else {
                return false;
            };
            self.detach(&connection).await;
            connection
        };
        self.finish_disconnect(&detached).await;
        true
    }

    /// Disconnects `identity` only if its live connection is `session`.
    ///
    /// Used when a specific connection ends (socket closed, write failed) so
    /// that a newer connection for the same identity is left in place.
    pub async fn disconnect_session(&self, identity: &ConnectionId, session: Uuid) -> bool {
        let detached = {
            let mut map = self.connections.write().await;
            match map.get(identity) {
                Some(current) if current.session() == session => {}
                _ => return false,
            }
            let Some(connection) = map.remove(identity) else {
                return false;
            };
            self.detach(&connection).await;
            connection
        };
        self.finish_disconnect(&detached).await;
        true
    }

    /// Disconnects every connection, waiting for all delivery loops.
    pub async fn disconnect_all(&self) -> usize {
        let detached: Vec<Arc<Connection>> = {
            let mut map = self.connections.write().await;
            let drained: Vec<Arc<Connection>> = map.drain().map(|(_, conn)| conn).collect();
            for connection in &drained {
                self.detach(connection).await;
            }
            drained
        };
        let count = detached.len();
        futures_util::future::join_all(detached.iter().map(|c| self.finish_disconnect(c))).await;
        count
    }

    /// Returns the active connection for `identity`, if any.
    pub async fn get(&self, identity: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .read()
            .await
            .get(identity)
            .filter(|conn| conn.is_active())
            .cloned()
    }

    /// Returns all active connections.
    pub async fn active(&self) -> Vec<Arc<Connection>> {
        self.connections
            .read()
            .await
            .values()
            .filter(|conn| conn.is_active())
            .cloned()
            .collect()
    }

    /// Returns the active connections subscribed to `topic`.
    ///
    /// The index is read under the registry lock, so a connection that
    /// replaced a subscriber (and so has no subscriptions yet) is never
    /// returned.
    pub async fn topic_subscribers(&self, topic: &str) -> Vec<Arc<Connection>> {
        let map = self.connections.read().await;
        self.topics
            .subscribers_of(topic)
            .await
            .iter()
            .filter_map(|identity| map.get(identity))
            .filter(|conn| conn.is_active())
            .cloned()
            .collect()
    }

    /// Returns the number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Subscribes an active connection to `topic`.
    ///
    /// Returns `None` if `identity` has no active connection, otherwise
    /// whether the subscription is new. The registry lock is held across the
    /// index update so a concurrent disconnect cannot leave it orphaned.
    pub async fn subscribe(&self, identity: &ConnectionId, topic: &str) -> Option<bool> {
        let map = self.connections.read().await;
        if !map.get(identity).is_some_and(|conn| conn.is_active()) {
            return None;
        }
        Some(self.topics.subscribe(identity, topic).await)
    }

    /// Unsubscribes an active connection from `topic`.
    ///
    /// Returns `None` if `identity` has no active connection, otherwise
    /// whether a subscription was removed.
    pub async fn unsubscribe(&self, identity: &ConnectionId, topic: &str) -> Option<bool> {
        let map = self.connections.read().await;
        if !map.get(identity).is_some_and(|conn| conn.is_active()) {
            return None;
        }
        Some(self.topics.unsubscribe(identity, topic).await)
    }

    /// Returns the capacity each mailbox is created with.
    #[must_use]
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Returns the number of connections torn down after a transport error.
    #[must_use]
    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Relaxed)
    }

    /// Marks a connection removed from the map as disconnecting and drops
    /// its subscriptions. Caller holds the registry write lock.
    async fn detach(&self, connection: &Connection) {
        connection.set_state(ConnectionState::Disconnecting);
        let purged = self.topics.purge(connection.identity()).await;
        tracing::debug!(identity = %connection.identity(), purged, "subscriptions purged");
    }

    /// Cancels the delivery loop, waits (bounded) for it, and closes.
    async fn finish_disconnect(&self, connection: &Connection) {
        if let Some(task) = connection.take_delivery() {
            let mut handle = task.cancel();
            match tokio::time::timeout(self.disconnect_timeout, &mut handle).await {
                Ok(Ok(exit)) => {
                    tracing::debug!(identity = %connection.identity(), ?exit, "delivery loop joined");
                }
                Ok(Err(err)) => {
                    tracing::error!(identity = %connection.identity(), error = %err, "delivery loop panicked");
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        identity = %connection.identity(),
                        timeout_ms = self.disconnect_timeout.as_millis(),
                        "delivery loop did not stop in time, aborted"
                    );
                }
            }
        }
        connection.mailbox().close();
        connection.set_state(ConnectionState::Closed);
        tracing::info!(
            identity = %connection.identity(),
            session = %connection.session(),
            "client disconnected"
        );
    }
}

/// Disconnects connections whose delivery loop reported a transport error.
async fn reap_failed(
    registry: Weak<ConnectionRegistry>,
    mut failures: mpsc::UnboundedReceiver<DeliveryFailure>,
) {
    while let Some(failure) = failures.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.transport_failures.fetch_add(1, Ordering::Relaxed);
        let removed = registry
            .disconnect_session(&failure.identity, failure.session)
            .await;
        tracing::debug!(
            identity = %failure.identity,
            session = %failure.session,
            removed,
            "reaped connection after transport failure"
        );
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
