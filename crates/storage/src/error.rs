use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage key must not be empty"))]
    EmptyKey { stage: &'static str },
    #[snafu(display("failed to create store directory at {path}"))]
    CreateStoreDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read value '{key}' from {path}"))]
    ReadValue {
        stage: &'static str,
        key: String,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write value '{key}' to {path}"))]
    WriteValue {
        stage: &'static str,
        key: String,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace {to} with staged write {from}"))]
    ReplaceValue {
        stage: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove value '{key}' at {path}"))]
    RemoveValue {
        stage: &'static str,
        key: String,
        path: String,
        source: std::io::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
