//! Typed event messages relayed to clients.
//!
//! A [`Message`] is an immutable [`Payload`] plus the server-assigned
//! timestamp of when it was built. The payload is a closed set of kinds,
//! each with its own fixed field set:
//!
//! ```json
//! {
//!   "type": "project_update",
//!   "project_id": "abc",
//!   "status": "completed",
//!   "progress": 100,
//!   "message": null,
//!   "timestamp": "2026-01-01T00:00:00Z"
//! }
//! ```
//!
//! Optional fields are always emitted, as `null` when absent.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::RelayError;

/// Lifecycle status of a background task or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet queued.
    Pending,
    /// Waiting in the job queue.
    Queued,
    /// Currently executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped before completion.
    Cancelled,
}

/// Severity of a system notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Informational.
    #[default]
    Info,
    /// Something needs attention.
    Warning,
    /// Something failed.
    Error,
}

/// Completion percentage, guaranteed to lie within `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Progress(u8);

impl Progress {
    /// Upper bound (inclusive).
    pub const MAX: u8 = 100;

    /// Validates and wraps a percentage.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidMessage`] if `value` is outside `0..=100`.
    pub fn new(value: i64) -> Result<Self, RelayError> {
        match u8::try_from(value) {
            Ok(pct) if pct <= Self::MAX => Ok(Self(pct)),
            _ => Err(RelayError::InvalidMessage(format!(
                "progress must be within 0..={}, got {value}",
                Self::MAX
            ))),
        }
    }

    /// Returns the percentage.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Progress {
    type Error = RelayError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Progress> for u8 {
    fn from(progress: Progress) -> Self {
        progress.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Status change of a single background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskUpdate {
    /// Task identifier.
    pub task_id: String,
    /// New status.
    pub status: JobStatus,
    /// Completion percentage, if known.
    #[schema(value_type = Option<u8>, minimum = 0, maximum = 100)]
    pub progress: Option<Progress>,
    /// Human-readable progress note.
    pub message: Option<String>,
    /// Failure description when `status` is `failed`.
    pub error: Option<String>,
}

impl TaskUpdate {
    /// Creates a task update with only the required fields set.
    #[must_use]
    pub fn new(task_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            progress: None,
            message: None,
            error: None,
        }
    }

    /// Sets the completion percentage.
    #[must_use]
    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the progress note.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the failure description.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Status change of a project (a group of tasks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProjectUpdate {
    /// Project identifier.
    pub project_id: String,
    /// New status.
    pub status: JobStatus,
    /// Completion percentage, if known.
    #[schema(value_type = Option<u8>, minimum = 0, maximum = 100)]
    pub progress: Option<Progress>,
    /// Human-readable progress note.
    pub message: Option<String>,
}

impl ProjectUpdate {
    /// Creates a project update with only the required fields set.
    #[must_use]
    pub fn new(project_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            project_id: project_id.into(),
            status,
            progress: None,
            message: None,
        }
    }

    /// Sets the completion percentage.
    #[must_use]
    pub fn progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the progress note.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Operator-facing notice, e.g. maintenance windows or quota warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemNotification {
    /// Producer-defined category.
    pub notification_type: String,
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(default)]
    pub level: NotificationLevel,
}

impl SystemNotification {
    /// Creates an `info`-level notification.
    #[must_use]
    pub fn new(
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
        }
    }

    /// Overrides the severity.
    #[must_use]
    pub fn level(mut self, level: NotificationLevel) -> Self {
        self.level = level;
        self
    }
}

/// Error report pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorNotification {
    /// Producer-defined error category.
    pub error_type: String,
    /// Human-readable description.
    pub error_message: String,
    /// Arbitrary structured context.
    #[schema(value_type = Option<Object>)]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
}

impl ErrorNotification {
    /// Creates an error notification without details.
    #[must_use]
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            details: None,
        }
    }

    /// Replaces the details map.
    #[must_use]
    pub fn details(mut self, details: BTreeMap<String, serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }

    /// Adds a single detail entry.
    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// The closed set of message kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// A task changed state.
    TaskUpdate(TaskUpdate),
    /// A project changed state.
    ProjectUpdate(ProjectUpdate),
    /// An operator notice.
    SystemNotification(SystemNotification),
    /// An error report.
    ErrorNotification(ErrorNotification),
}

impl Payload {
    /// Returns the wire discriminator of this kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TaskUpdate(_) => "task_update",
            Self::ProjectUpdate(_) => "project_update",
            Self::SystemNotification(_) => "system_notification",
            Self::ErrorNotification(_) => "error_notification",
        }
    }
}

/// An immutable, timestamped event ready for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Wraps a payload, stamping it with the current time.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self::with_timestamp(payload, Utc::now())
    }

    /// Wraps a payload with an explicit timestamp.
    #[must_use]
    pub const fn with_timestamp(payload: Payload, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the server-assigned timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the wire discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Serializes the message into the text frame sent to clients.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Internal`] if JSON serialization fails.
    pub fn to_frame(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<Payload> for Message {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

impl From<TaskUpdate> for Message {
    fn from(update: TaskUpdate) -> Self {
        Self::new(Payload::TaskUpdate(update))
    }
}

impl From<ProjectUpdate> for Message {
    fn from(update: ProjectUpdate) -> Self {
        Self::new(Payload::ProjectUpdate(update))
    }
}

impl From<SystemNotification> for Message {
    fn from(notification: SystemNotification) -> Self {
        Self::new(Payload::SystemNotification(notification))
    }
}

impl From<ErrorNotification> for Message {
    fn from(notification: ErrorNotification) -> Self {
        Self::new(Payload::ErrorNotification(notification))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn to_value(message: &Message) -> serde_json::Value {
        let Ok(frame) = message.to_frame() else {
            panic!("serialization failed");
        };
        let Ok(value) = serde_json::from_str(&frame) else {
            panic!("frame is not JSON");
        };
        value
    }

    #[test]
    fn progress_rejects_out_of_range() {
        assert!(Progress::new(0).is_ok());
        assert!(Progress::new(100).is_ok());
        assert!(Progress::new(101).is_err());
        assert!(Progress::new(-1).is_err());
    }

    #[test]
    fn task_update_wire_shape() {
        let Ok(progress) = Progress::new(40) else {
            panic!("valid progress");
        };
        let message: Message = TaskUpdate::new("t-1", JobStatus::Processing)
            .progress(progress)
            .message("slicing clips")
            .into();
        let value = to_value(&message);

        assert_eq!(value["type"], "task_update");
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["status"], "processing");
        assert_eq!(value["progress"], 40);
        assert_eq!(value["message"], "slicing clips");
        assert!(value["error"].is_null());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn absent_optionals_serialize_as_null() {
        let message: Message = ProjectUpdate::new("abc", JobStatus::Pending).into();
        let value = to_value(&message);
        let Some(obj) = value.as_object() else {
            panic!("expected object");
        };
        assert!(obj.contains_key("progress"));
        assert!(obj.contains_key("message"));
        assert!(value["progress"].is_null());
    }

    #[test]
    fn system_notification_defaults_to_info() {
        let message: Message = SystemNotification::new("maintenance", "Heads up", "Restart at 2am")
            .into();
        assert_eq!(to_value(&message)["level"], "info");

        let message: Message = SystemNotification::new("quota", "Quota", "90% used")
            .level(NotificationLevel::Warning)
            .into();
        assert_eq!(to_value(&message)["level"], "warning");
    }

    #[test]
    fn error_notification_details() {
        let message: Message = ErrorNotification::new("upload_failed", "remote rejected file")
            .detail("attempt", 3)
            .detail("file", "clip_01.mp4")
            .into();
        let value = to_value(&message);
        assert_eq!(value["type"], "error_notification");
        assert_eq!(value["details"]["attempt"], 3);
        assert_eq!(value["details"]["file"], "clip_01.mp4");
    }

    #[test]
    fn payload_deserializes_from_producer_json() {
        let json = r#"{"type":"project_update","project_id":"abc","status":"completed","progress":100}"#;
        let Ok(payload) = serde_json::from_str::<Payload>(json) else {
            panic!("payload should parse");
        };
        assert_eq!(payload.kind(), "project_update");
        let Payload::ProjectUpdate(update) = payload else {
            panic!("wrong variant");
        };
        assert_eq!(update.progress.map(Progress::get), Some(100));
        assert!(update.message.is_none());
    }

    #[test]
    fn payload_rejects_invalid_progress() {
        let json = r#"{"type":"task_update","task_id":"t","status":"processing","progress":140}"#;
        assert!(serde_json::from_str::<Payload>(json).is_err());
    }

    #[test]
    fn payload_rejects_unknown_kind() {
        let json = r#"{"type":"chat","text":"hi"}"#;
        assert!(serde_json::from_str::<Payload>(json).is_err());
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let ts = DateTime::<Utc>::UNIX_EPOCH;
        let message = Message::with_timestamp(
            Payload::ProjectUpdate(ProjectUpdate::new("p", JobStatus::Queued)),
            ts,
        );
        assert_eq!(message.timestamp(), ts);
        assert_eq!(message.kind(), "project_update");
    }
}
