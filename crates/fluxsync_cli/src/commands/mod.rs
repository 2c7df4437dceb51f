//! CLI command implementations.

pub mod compact;
pub mod erase;
pub mod inspect;
pub mod range;
pub mod replay;

use fluxsync_core::{CoreError, Database, JOURNAL_FILE};
use fluxsync_engine::{SyncConfig, SyncError};
use fluxsync_protocol::ProtocolError;
use fluxsync_storage::{FileBlobStore, StorageError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no journal.
    #[error("no fluxsync data found at {0:?}")]
    MissingData(PathBuf),

    /// Unrecognized facet kind name.
    #[error("unknown facet kind: {0}")]
    UnknownKind(String),

    /// Unrecognized or disabled provider.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// Database error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Blob storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Feed decoding error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Sync cycle error.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Output encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// File system error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Opens the database of a data directory that must already exist.
pub fn open_existing(path: &Path) -> CliResult<Database> {
    if !path.join(JOURNAL_FILE).exists() {
        return Err(CliError::MissingData(path.to_path_buf()));
    }
    Ok(Database::open(path)?)
}

/// Blob store of `provider` under a data directory.
pub fn blob_store(path: &Path, provider: &str) -> FileBlobStore {
    let config = SyncConfig::default().with_blob_root(path.join("blobs"));
    let dir = config
        .blob_dir_for(provider)
        .unwrap_or_else(|| path.join("blobs"));
    FileBlobStore::new(dir)
}
