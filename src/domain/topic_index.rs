//! Bidirectional connection ↔ topic subscription index.
//!
//! [`TopicIndex`] keeps two maps, topic → subscribers and identity →
//! topics, behind a single lock so every mutation updates both directions
//! as one step. An identity appears under a topic in one map exactly when
//! the topic appears under the identity in the other. Empty sets are pruned
//! so neither map accumulates dead keys.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use super::ConnectionId;
use crate::error::RelayError;

/// Longest topic name accepted, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Checks that a topic name is usable.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] if the topic is blank or longer
/// than [`MAX_TOPIC_LEN`] bytes.
pub fn validate_topic(topic: &str) -> Result<(), RelayError> {
    if topic.trim().is_empty() {
        return Err(RelayError::InvalidRequest(
            "topic must not be empty".to_string(),
        ));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(RelayError::InvalidRequest(format!(
            "topic exceeds {MAX_TOPIC_LEN} bytes"
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Subscriptions {
    by_topic: HashMap<String, HashSet<ConnectionId>>,
    by_identity: HashMap<ConnectionId, HashSet<String>>,
}

/// Many-to-many subscription relation between identities and topics.
#[derive(Debug, Default)]
pub struct TopicIndex {
    inner: RwLock<Subscriptions>,
}

impl TopicIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `identity` to `topic`. Returns `false` if it already was.
    pub async fn subscribe(&self, identity: &ConnectionId, topic: &str) -> bool {
        let mut subs = self.inner.write().await;
        let added = subs
            .by_topic
            .entry(topic.to_string())
            .or_default()
            .insert(identity.clone());
        subs.by_identity
            .entry(identity.clone())
            .or_default()
            .insert(topic.to_string());
        added
    }

    /// Removes `identity` from `topic`. Returns `false` if it was not
    /// subscribed.
    pub async fn unsubscribe(&self, identity: &ConnectionId, topic: &str) -> bool {
        let mut subs = self.inner.write().await;
        let removed = remove_member(&mut subs.by_topic, topic, identity);
        remove_member(&mut subs.by_identity, identity, topic);
        removed
    }

    /// Drops every subscription held by `identity`, returning how many
    /// were removed.
    pub async fn purge(&self, identity: &ConnectionId) -> usize {
        let mut subs = self.inner.write().await;
        let Some(topics) = subs.by_identity.remove(identity) else {
            return 0;
        };
        for topic in &topics {
            remove_member(&mut subs.by_topic, topic.as_str(), identity);
        }
        topics.len()
    }

    /// Returns the identities subscribed to `topic`.
    pub async fn subscribers_of(&self, topic: &str) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .by_topic
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the topics `identity` is subscribed to.
    pub async fn topics_of(&self, identity: &ConnectionId) -> HashSet<String> {
        self.inner
            .read()
            .await
            .by_identity
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of subscribers of `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .await
            .by_topic
            .get(topic)
            .map_or(0, HashSet::len)
    }

    /// Returns the number of topics with at least one subscriber.
    pub async fn topic_count(&self) -> usize {
        self.inner.read().await.by_topic.len()
    }

    /// Verifies that both directions of the index agree.
    #[cfg(test)]
    pub(crate) async fn is_symmetric(&self) -> bool {
        let subs = self.inner.read().await;
        let forward = subs.by_topic.iter().all(|(topic, ids)| {
            ids.iter().all(|id| {
                subs.by_identity
                    .get(id)
                    .is_some_and(|topics| topics.contains(topic))
            })
        });
        let backward = subs.by_identity.iter().all(|(id, topics)| {
            topics.iter().all(|topic| {
                subs.by_topic
                    .get(topic)
                    .is_some_and(|ids| ids.contains(id))
            })
        });
        forward && backward
    }
}

/// Removes `member` from the set under `key`, pruning the set if it empties.
fn remove_member<K, Q, M, R>(map: &mut HashMap<K, HashSet<M>>, key: &Q, member: &R) -> bool
where
    K: std::hash::Hash + Eq + std::borrow::Borrow<Q>,
    Q: std::hash::Hash + Eq + ?Sized,
    M: std::hash::Hash + Eq + std::borrow::Borrow<R>,
    R: std::hash::Hash + Eq + ?Sized,
{
    let Some(set) = map.get_mut(key) else {
        return false;
    };
    let removed = set.remove(member);
    if set.is_empty() {
        map.remove(key);
    }
    removed
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ConnectionId {
        ConnectionId::from(raw)
    }

    #[tokio::test]
    async fn subscribe_updates_both_directions() {
        let index = TopicIndex::new();
        assert!(index.subscribe(&id("u1"), "project-abc").await);

        assert!(index.subscribers_of("project-abc").await.contains(&id("u1")));
        assert!(index.topics_of(&id("u1")).await.contains("project-abc"));
        assert!(index.is_symmetric().await);
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let index = TopicIndex::new();
        assert!(index.subscribe(&id("u1"), "t").await);
        assert!(!index.subscribe(&id("u1"), "t").await);
        assert_eq!(index.subscriber_count("t").await, 1);
        assert_eq!(index.topics_of(&id("u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_prunes() {
        let index = TopicIndex::new();
        index.subscribe(&id("u1"), "t").await;
        assert!(index.unsubscribe(&id("u1"), "t").await);
        assert!(!index.unsubscribe(&id("u1"), "t").await);
        assert_eq!(index.topic_count().await, 0);
        assert!(index.topics_of(&id("u1")).await.is_empty());
        assert!(index.is_symmetric().await);
    }

    #[tokio::test]
    async fn purge_removes_all_subscriptions_of_identity() {
        let index = TopicIndex::new();
        index.subscribe(&id("u1"), "a").await;
        index.subscribe(&id("u1"), "b").await;
        index.subscribe(&id("u2"), "a").await;

        assert_eq!(index.purge(&id("u1")).await, 2);
        assert_eq!(index.purge(&id("u1")).await, 0);

        let subscribers = index.subscribers_of("a").await;
        assert_eq!(subscribers.len(), 1);
        assert!(subscribers.contains(&id("u2")));
        assert_eq!(index.subscriber_count("b").await, 0);
        assert!(index.is_symmetric().await);
    }

    #[tokio::test]
    async fn symmetry_holds_across_mixed_sequence() {
        let index = TopicIndex::new();
        let ops: &[(bool, &str, &str)] = &[
            (true, "u1", "a"),
            (true, "u2", "a"),
            (true, "u1", "b"),
            (false, "u2", "a"),
            (true, "u3", "c"),
            (false, "u9", "zz"),
            (true, "u2", "b"),
            (false, "u1", "a"),
        ];
        for (subscribe, who, topic) in ops {
            if *subscribe {
                index.subscribe(&id(who), topic).await;
            } else {
                index.unsubscribe(&id(who), topic).await;
            }
            assert!(index.is_symmetric().await);
        }
        assert_eq!(index.subscriber_count("a").await, 0);
        assert_eq!(index.subscriber_count("b").await, 2);
    }

    #[test]
    fn validate_topic_rules() {
        assert!(validate_topic("project-abc").is_ok());
        assert!(validate_topic("").is_err());
        assert!(validate_topic("  ").is_err());
        assert!(validate_topic(&"t".repeat(MAX_TOPIC_LEN + 1)).is_err());
    }
}
