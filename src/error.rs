use camino::Utf8PathBuf;
use thiserror::Error;

/// Top-level error returned by the task artifact state operations.
///
/// Change detection failures ([`StateError::Snapshot`]) are kept apart from
/// failures to persist the history ([`StateError::Store`]) or to locate the
/// backing cache ([`StateError::Cache`]).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Couldn't snapshot task files:\n{0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Couldn't commit task history:\n{0}")]
    Store(#[from] StoreError),

    #[error("Couldn't open task history cache:\n{0}")]
    Cache(#[from] CacheError),
}

/// A declared path exists but its kind or content can't be read.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Path '{path}' exists but is unreadable.\n{source}")]
    Unreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't encode cache properties.\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Couldn't write task history.\n{0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't encode task history.\n{0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),

    #[error("Cache commit failed.\n{0}")]
    Cache(#[from] CacheError),
}
