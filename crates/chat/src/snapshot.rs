use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::message::{Message, Sender, monotonic_unix_millis};

/// Storage key the serialized snapshot list lives under.
pub const HISTORY_KEY: &str = "chat_history";

/// Titles derived from the first user message are cut at this many
/// characters, with an ellipsis appended when the message is longer.
pub const TITLE_CHAR_LIMIT: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn mint() -> Self {
        Self(monotonic_unix_millis().to_string())
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One saved assistant conversation. The list is kept most recently
/// updated first; every commit moves the touched snapshot to the front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: SnapshotId,
    pub title: String,
    pub messages: Vec<Message>,
    pub last_updated: u64,
}

/// Derives a snapshot title from the first user message, or the fallback
/// label while the conversation holds only the seeded greeting.
pub fn snapshot_title(messages: &[Message], fallback: &str) -> String {
    let Some(first_user) = messages
        .iter()
        .find(|message| message.sender == Sender::User)
    else {
        return fallback.to_string();
    };

    let text = first_user.text.trim();
    if text.is_empty() {
        return fallback.to_string();
    }

    let mut title: String = text.chars().take(TITLE_CHAR_LIMIT).collect();
    if text.chars().count() > TITLE_CHAR_LIMIT {
        title.push_str("...");
    }
    title
}

pub fn encode_history(history: &[ConversationSnapshot]) -> serde_json::Result<String> {
    serde_json::to_string(history)
}

/// A corrupt stored list never aborts startup; it logs and starts empty.
pub fn decode_history(raw: &str) -> Vec<ConversationSnapshot> {
    match serde_json::from_str(raw) {
        Ok(history) => history,
        Err(error) => {
            warn!(error = %error, "stored chat history is unreadable; starting empty");
            Vec::new()
        }
    }
}
