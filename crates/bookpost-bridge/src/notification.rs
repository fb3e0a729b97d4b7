use std::fmt;

use serde::{Deserialize, Serialize};

use crate::CorrelationId;

/// Severity or category for user-visible notifications.
///
/// On the transport the severity is a small ordinal (`0..=3`), with
/// [`NotificationType::Danger`] as the highest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NotificationType {
    /// Neutral informational message that does not indicate success or failure.
    Info = 0,
    /// Indicates a successful operation or positive outcome.
    Success = 1,
    /// Indicates a non-critical issue that the user should be aware of, but
    /// does not prevent normal operation.
    Warning = 2,
    /// Indicates an error or failure of the operation in flight.
    Danger = 3,
}

/// Returned when a transport severity code is outside `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown notification severity code {0}")]
pub struct UnknownSeverity(pub u8);

impl TryFrom<u8> for NotificationType {
    type Error = UnknownSeverity;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Info),
            1 => Ok(Self::Success),
            2 => Ok(Self::Warning),
            3 => Ok(Self::Danger),
            other => Err(UnknownSeverity(other)),
        }
    }
}

impl From<NotificationType> for u8 {
    fn from(value: NotificationType) -> Self {
        value as u8
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationType::Info => "info",
            NotificationType::Success => "success",
            NotificationType::Warning => "warning",
            NotificationType::Danger => "danger",
        };
        f.write_str(name)
    }
}

/// Machine-readable meaning of a notification.
///
/// Backends that know which step of a delivery produced a notification
/// attach one of these; the human-readable title then serves display only.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// The backend accepted the delivery and is waiting for the download.
    FetchStarted,
    /// The requested resource is available locally.
    FetchCompleted,
    /// The resource was handed to the mail transport.
    DeliveryCompleted,
    /// The delivery cannot complete.
    DeliveryFailed {
        /// Backend-side description of what went wrong.
        reason: String,
    },
}

/// A notification payload pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationMessage {
    /// The type/severity of the notification, determining its visual style.
    #[serde(rename = "appearance")]
    pub notification_type: NotificationType,
    /// The text content to display to the user.
    pub title: String,
    /// Optional secondary text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Correlation id of the command that caused this notification, if the
    /// backend knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Structured meaning of the notification, if the backend provides one.
    #[serde(flatten)]
    pub kind: Option<EventKind>,
}

impl NotificationMessage {
    /// Builds an uncorrelated, unstructured notification.
    pub fn new(notification_type: NotificationType, title: impl Into<String>) -> Self {
        Self {
            notification_type,
            title: title.into(),
            detail: None,
            correlation_id: None,
            kind: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn correlated(mut self, correlation_id: Option<CorrelationId>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }
}
