//! Notification model and push message parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub i64);

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "notification#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl NotificationPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    /// Critical and high notifications are urgent.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadState {
    Unread,
    Read,
}

impl Default for ReadState {
    fn default() -> Self {
        Self::Unread
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    #[serde(default)]
    pub message: String,
    pub priority: NotificationPriority,
    #[serde(default)]
    pub read_state: ReadState,
    pub created_at: DateTime<Utc>,
    /// Free-form category tag set by the producer
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.read_state == ReadState::Unread
    }

    /// Belongs in the urgent buffer.
    pub fn is_urgent_unread(&self) -> bool {
        self.is_unread() && self.priority.is_urgent()
    }
}

/// Message delivered over the push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    NewNotification(Notification),
    UnreadSnapshot(Vec<Notification>),
    /// Any other message type; carries the type tag
    Other(String),
}

#[derive(Deserialize)]
struct RawPush {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl PushMessage {
    /// Parse a `{type, data}` frame. Unknown types are kept as `Other`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawPush = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            "new_notification" => Ok(Self::NewNotification(serde_json::from_value(raw.data)?)),
            "unread_snapshot" => Ok(Self::UnreadSnapshot(serde_json::from_value(raw.data)?)),
            _ => Ok(Self::Other(raw.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_new_notification() {
        let text = r#"{
            "type": "new_notification",
            "data": {
                "id": 17,
                "title": "Deadline missed",
                "message": "Phase Build is over due",
                "priority": "critical",
                "read_state": "unread",
                "created_at": "2026-10-01T09:30:00Z",
                "type": "deadline"
            }
        }"#;
        match PushMessage::parse(text).unwrap() {
            PushMessage::NewNotification(n) => {
                assert_eq!(n.id, NotificationId(17));
                assert_eq!(n.priority, NotificationPriority::Critical);
                assert!(n.is_urgent_unread());
                assert_eq!(n.kind.as_deref(), Some("deadline"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_snapshot_and_unknown_types() {
        let text = r#"{"type": "unread_snapshot", "data": []}"#;
        assert_eq!(
            PushMessage::parse(text).unwrap(),
            PushMessage::UnreadSnapshot(vec![])
        );
        let text = r#"{"type": "ping"}"#;
        assert_eq!(
            PushMessage::parse(text).unwrap(),
            PushMessage::Other("ping".to_string())
        );
        assert!(PushMessage::parse("not json").is_err());
    }
}
