//! Client → server commands and the replies sent back for them.
//!
//! Clients send JSON commands tagged by `"action"`:
//!
//! ```json
//! {"action": "subscribe", "topic": "project-abc"}
//! {"action": "unsubscribe", "topic": "project-abc"}
//! {"action": "ping"}
//! ```
//!
//! Replies reuse the relay's message kinds so every frame a client sees has
//! the same envelope: acknowledgements are `system_notification`s and
//! rejected commands are `error_notification`s.

use serde::Deserialize;

use crate::domain::{ErrorNotification, Message, SystemNotification};

/// Commands that a client can send over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start receiving messages published to `topic`.
    Subscribe {
        /// Topic name, e.g. a project or task identifier.
        topic: String,
    },
    /// Stop receiving messages published to `topic`.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Liveness probe; answered with a `pong` notification.
    Ping,
}

/// `notification_type` of command acknowledgements.
pub const ACK_NOTIFICATION: &str = "subscription";

/// `notification_type` of ping replies.
pub const PONG_NOTIFICATION: &str = "pong";

/// `error_type` of rejected commands.
pub const INVALID_COMMAND: &str = "invalid_command";

/// Acknowledges a subscribe command.
#[must_use]
pub fn subscribed(topic: &str) -> Message {
    SystemNotification::new(ACK_NOTIFICATION, "subscribed", topic).into()
}

/// Acknowledges an unsubscribe command.
#[must_use]
pub fn unsubscribed(topic: &str) -> Message {
    SystemNotification::new(ACK_NOTIFICATION, "unsubscribed", topic).into()
}

/// Replies to a ping.
#[must_use]
pub fn pong() -> Message {
    SystemNotification::new(PONG_NOTIFICATION, "pong", "pong").into()
}

/// Reports a command the relay could not act on.
#[must_use]
pub fn rejected(reason: impl Into<String>) -> Message {
    ErrorNotification::new(INVALID_COMMAND, reason).into()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Payload;

    #[test]
    fn parses_subscribe() {
        let Ok(cmd) = serde_json::from_str::<ClientCommand>(
            r#"{"action":"subscribe","topic":"project-abc"}"#,
        ) else {
            panic!("subscribe should parse");
        };
        assert_eq!(
            cmd,
            ClientCommand::Subscribe {
                topic: "project-abc".to_string()
            }
        );
    }

    #[test]
    fn parses_ping() {
        let Ok(cmd) = serde_json::from_str::<ClientCommand>(r#"{"action":"ping"}"#) else {
            panic!("ping should parse");
        };
        assert_eq!(cmd, ClientCommand::Ping);
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"action":"launch"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>(r#"{"action":"subscribe"}"#).is_err());
    }

    #[test]
    fn replies_use_relay_kinds() {
        assert_eq!(subscribed("t").kind(), "system_notification");
        assert_eq!(pong().kind(), "system_notification");
        let Payload::ErrorNotification(err) = rejected("bad").payload().clone() else {
            panic!("rejection should be an error notification");
        };
        assert_eq!(err.error_type, INVALID_COMMAND);
        assert_eq!(err.error_message, "bad");
    }
}
