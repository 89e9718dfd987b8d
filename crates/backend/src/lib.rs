pub mod client;
pub mod error;
pub mod models;
pub mod presence;

pub use client::{
    BackendClient, BackendConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT, DirectMessageApi,
};
pub use error::{BackendError, BackendResult};
pub use models::{Contact, DirectMessage, MessageKind, NewDirectMessage, UserId};
pub use presence::{DEFAULT_HEARTBEAT_PERIOD, spawn_heartbeat};
