pub mod message;
pub mod profile;
pub mod section;
pub mod session;
pub mod snapshot;

pub use message::{Message, MessageId, Sender};
pub use profile::{PROFILE_KEY, ProfileError, ProfileResult, ProfileStore, UserProfile};
pub use section::Section;
pub use session::{
    ChatSession, DEFAULT_DEBOUNCE, HistorySummary, PeerBinding, SessionConfig, SessionMode,
    SessionView,
};
pub use snapshot::{
    ConversationSnapshot, HISTORY_KEY, SnapshotId, TITLE_CHAR_LIMIT, decode_history,
    encode_history, snapshot_title,
};
