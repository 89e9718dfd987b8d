pub mod error;
pub mod file;

pub use error::{StorageError, StorageResult};
pub use file::{DEFAULT_STORE_DIRECTORY, FileStore};

use async_trait::async_trait;

/// String key-value surface everything durable in the app goes through.
/// Values are already-encoded documents; the store never interprets them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    async fn remove(&self, key: &str) -> StorageResult<()>;
}
