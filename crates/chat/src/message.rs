use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use satsang_backend::{DirectMessage, UserId};

use crate::section::Section;

/// Transcript-local message identifier. Assistant-mode ids are minted from
/// the wall clock; peer-mode ids keep the backend's record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn mint() -> Self {
        Self(monotonic_unix_millis().to_string())
    }

    pub fn from_server(raw: u64) -> Self {
        Self(raw.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    Peer,
}

/// One displayed chat line. Never mutated after creation; the session
/// replaces whole transcripts instead of editing messages in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub text: String,
    pub sender: Sender,
    /// Present on peer messages, sourced from the backend record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Section slug a guided-search seed points the UI at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<String>,
}

impl Message {
    fn fresh(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::mint(),
            text: text.into(),
            sender,
            created_at: None,
            navigation: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::fresh(Sender::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::fresh(Sender::Assistant, text)
    }

    /// Seed for a guided section search: an assistant bubble carrying the
    /// section's search prompt and its navigation slug.
    pub fn section_seed(section: Section) -> Self {
        let mut message = Self::fresh(Sender::Assistant, section.search_prompt());
        message.navigation = Some(section.slug().to_string());
        message
    }

    /// Maps a stored direct message into the transcript, resolving the
    /// sender discriminant once at the ingestion boundary.
    pub fn from_direct(record: &DirectMessage, local_user: UserId) -> Self {
        let sender = if record.sender_id == local_user {
            Sender::User
        } else {
            Sender::Peer
        };
        Self {
            id: MessageId::from_server(record.id),
            text: record.content.clone(),
            sender,
            created_at: Some(record.created_at),
            navigation: None,
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis() as u64)
}

static LAST_MINTED_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Wall-clock milliseconds bumped past the previous mint, so two ids minted
/// within the same millisecond never collide and ordering stays monotonic.
pub(crate) fn monotonic_unix_millis() -> u64 {
    let now = unix_millis();
    let mut last = LAST_MINTED_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MINTED_MILLIS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satsang_backend::MessageKind;

    fn direct(id: u64, sender: u64, recipient: u64, content: &str) -> DirectMessage {
        DirectMessage {
            id,
            created_at: "2026-03-01T09:30:00Z".parse().expect("timestamp"),
            sender_id: UserId::new(sender),
            recipient_id: UserId::new(recipient),
            content: content.to_string(),
            kind: MessageKind::Text,
        }
    }

    #[test]
    fn minted_ids_are_strictly_increasing() {
        let ids: Vec<u64> = (0..64).map(|_| monotonic_unix_millis()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn direct_message_from_local_user_is_tagged_user() {
        let message = Message::from_direct(&direct(42, 7, 9, "namaste"), UserId::new(7));
        assert_eq!(message.sender, Sender::User);
        assert_eq!(message.id, MessageId::from_server(42));
        assert!(message.created_at.is_some());
    }

    #[test]
    fn direct_message_from_other_user_is_tagged_peer() {
        let message = Message::from_direct(&direct(43, 9, 7, "hare krishna"), UserId::new(7));
        assert_eq!(message.sender, Sender::Peer);
        assert_eq!(message.text, "hare krishna");
    }

    #[test]
    fn message_serializes_lowercase_sender_and_skips_empty_fields() {
        let message = Message::user("hello");
        let value = serde_json::to_value(&message).expect("encode");
        assert_eq!(value["sender"], "user");
        assert!(value.get("created_at").is_none());
        assert!(value.get("navigation").is_none());
    }

    #[test]
    fn section_seed_carries_slug_and_prompt() {
        let seed = Message::section_seed(Section::KnowledgeBase);
        assert_eq!(seed.sender, Sender::Assistant);
        assert_eq!(seed.navigation.as_deref(), Some("knowledge_base"));
        assert!(!seed.text.is_empty());
    }
}
