//! Domain layer: message model, mailboxes, subscriptions, and connections.
//!
//! This module contains the relay's core state: typed event messages,
//! the per-connection bounded mailbox with its delivery loop, the
//! bidirectional topic index, and the connection registry that owns each
//! connection's lifecycle.

pub mod connection_id;
pub mod connection_registry;
pub mod mailbox;
pub mod message;
pub mod topic_index;

pub use connection_id::ConnectionId;
pub use connection_registry::{Connection, ConnectionInfo, ConnectionRegistry, ConnectionState};
pub use mailbox::{EnqueueOutcome, Mailbox, MailboxStats, Transport};
pub use message::{
    ErrorNotification, JobStatus, Message, NotificationLevel, Payload, Progress, ProjectUpdate,
    SystemNotification, TaskUpdate,
};
pub use topic_index::TopicIndex;
