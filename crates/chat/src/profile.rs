use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::warn;

use satsang_backend::UserId;
use satsang_storage::{KeyValueStore, StorageError};

/// Storage key the logged-in user's profile lives under.
pub const PROFILE_KEY: &str = "user_profile";

/// The slice of the account the session needs locally: the identity peer
/// messages are attributed to, plus display fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    #[serde(default)]
    pub karmic_name: String,
    #[serde(default)]
    pub spiritual_name: String,
    #[serde(default)]
    pub email: String,
}

impl UserProfile {
    pub fn new(id: UserId, karmic_name: impl Into<String>) -> Self {
        Self {
            id,
            karmic_name: karmic_name.into(),
            spiritual_name: String::new(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProfileError {
    #[snafu(display("failed to encode the user profile"))]
    EncodeProfile {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to store the user profile"))]
    StoreProfile {
        stage: &'static str,
        source: StorageError,
    },
}

pub type ProfileResult<T> = Result<T, ProfileError>;

/// Persisted profile access over the key-value store. A missing or
/// unreadable record reads as "not logged in" rather than an error.
pub struct ProfileStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn load(&self) -> Option<UserProfile> {
        match self.store.get(PROFILE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(profile) => Some(profile),
                Err(error) => {
                    warn!(error = %error, "stored user profile is unreadable; treating as logged out");
                    None
                }
            },
            Ok(None) => None,
            Err(error) => {
                warn!(error = %error, "failed to read the stored user profile");
                None
            }
        }
    }

    pub async fn save(&self, profile: &UserProfile) -> ProfileResult<()> {
        let encoded = serde_json::to_string(profile).context(EncodeProfileSnafu { stage: "save" })?;
        self.store
            .set(PROFILE_KEY, &encoded)
            .await
            .context(StoreProfileSnafu { stage: "save" })
    }

    pub async fn clear(&self) -> ProfileResult<()> {
        self.store
            .remove(PROFILE_KEY)
            .await
            .context(StoreProfileSnafu { stage: "clear" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satsang_storage::FileStore;

    fn temp_profiles() -> (tempfile::TempDir, ProfileStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = ProfileStore::new(Arc::new(FileStore::new(dir.path())));
        (dir, store)
    }

    #[tokio::test]
    async fn profile_roundtrips_through_the_store() {
        let (_dir, profiles) = temp_profiles();
        let profile = UserProfile::new(UserId::new(7), "Ivan");
        profiles.save(&profile).await.expect("save");
        assert_eq!(profiles.load().await, Some(profile));
    }

    #[tokio::test]
    async fn missing_profile_loads_as_none() {
        let (_dir, profiles) = temp_profiles();
        assert_eq!(profiles.load().await, None);
    }

    #[tokio::test]
    async fn corrupt_profile_loads_as_none() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let raw_store = Arc::new(FileStore::new(dir.path()));
        raw_store.set(PROFILE_KEY, "{broken").await.expect("seed");
        let profiles = ProfileStore::new(raw_store);
        assert_eq!(profiles.load().await, None);
    }

    #[tokio::test]
    async fn clear_removes_the_stored_profile() {
        let (_dir, profiles) = temp_profiles();
        profiles
            .save(&UserProfile::new(UserId::new(7), "Ivan"))
            .await
            .expect("save");
        profiles.clear().await.expect("clear");
        assert_eq!(profiles.load().await, None);
    }
}
