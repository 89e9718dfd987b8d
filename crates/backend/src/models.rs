use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

/// One stored direct message. Field casing mirrors the backend's gorm
/// serialization; unknown gorm bookkeeping fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
    #[serde(rename = "recipientId")]
    pub recipient_id: UserId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewDirectMessage {
    #[serde(rename = "senderId")]
    pub sender_id: UserId,
    #[serde(rename = "recipientId")]
    pub recipient_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

/// The slice of the backend user record the chat surface displays.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(rename = "ID")]
    pub id: UserId,
    #[serde(rename = "karmicName", default)]
    pub karmic_name: String,
    #[serde(rename = "spiritualName", default)]
    pub spiritual_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar_url: String,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

impl Contact {
    /// Peers are addressed by spiritual name when one is set.
    pub fn display_name(&self) -> &str {
        if !self.spiritual_name.trim().is_empty() {
            &self.spiritual_name
        } else {
            &self.karmic_name
        }
    }
}
