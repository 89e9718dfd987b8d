use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::KeyValueStore;
use crate::error::{
    CreateStoreDirectorySnafu, EmptyKeySnafu, ReadValueSnafu, RemoveValueSnafu, ReplaceValueSnafu,
    StorageResult, WriteValueSnafu,
};

pub const DEFAULT_STORE_DIRECTORY: &str = "satsang";

/// One file per key under a root directory. Writes stage into a sibling
/// temp file and rename over the target, so a crashed write leaves the
/// previous value intact.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted under the platform data directory, falling back to a
    /// hidden directory in the working directory when the platform does not
    /// report one.
    pub fn open_default() -> Self {
        Self::new(default_store_root(dirs::data_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, stage: &'static str, key: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(sanitize_key(stage, key)?))
    }
}

fn default_store_root(data_dir: Option<PathBuf>) -> PathBuf {
    match data_dir {
        Some(base) => base.join(DEFAULT_STORE_DIRECTORY),
        None => PathBuf::from(format!(".{DEFAULT_STORE_DIRECTORY}")),
    }
}

/// Keys map to file names, so anything outside `[A-Za-z0-9._-]` becomes `_`.
/// The same key always resolves to the same path.
fn sanitize_key(stage: &'static str, key: &str) -> StorageResult<String> {
    ensure!(!key.trim().is_empty(), EmptyKeySnafu { stage });
    Ok(key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect())
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.entry_path("get", key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error).context(ReadValueSnafu {
                stage: "get",
                key,
                path: path.display().to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path("set", key)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .context(CreateStoreDirectorySnafu {
                stage: "set",
                path: self.root.display().to_string(),
            })?;
        let staged = self.root.join(format!("{}.tmp", sanitize_key("set", key)?));
        tokio::fs::write(&staged, value)
            .await
            .context(WriteValueSnafu {
                stage: "set",
                key,
                path: staged.display().to_string(),
            })?;
        tokio::fs::rename(&staged, &path)
            .await
            .context(ReplaceValueSnafu {
                stage: "set",
                from: staged.display().to_string(),
                to: path.display().to_string(),
            })?;
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path("remove", key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error).context(RemoveValueSnafu {
                stage: "remove",
                key,
                path: path.display().to_string(),
            }),
        }
    }
}
