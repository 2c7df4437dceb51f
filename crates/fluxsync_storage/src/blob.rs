//! Keyed storage for binary item bodies.
//!
//! Connectors often receive binary payloads next to the structured fields
//! they turn into facets: a note's attached PDF, the OCR recognition XML for
//! an image, an alternate rendition. Those bodies are kept out of the facet
//! records and written here instead.
//!
//! A blob is addressed by [`BlobKey`]: the owning connection, the provider's
//! item id and a [`BlobRole`]. On disk this becomes
//! `<root>/<connection>/<item>[_<role>]<ext>` where the extension is derived
//! from the mime type (recognition bodies are always `.xml`).

use crate::error::{StorageError, StorageResult};
use crate::mime::extension_for;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// What a blob is to the item that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobRole {
    /// The primary body of the item.
    Main,
    /// An alternate rendition of the body.
    Alternate,
    /// Provider-computed recognition data (always XML).
    Recognition,
}

impl BlobRole {
    /// Every role, in a fixed order.
    pub const ALL: [BlobRole; 3] = [BlobRole::Main, BlobRole::Alternate, BlobRole::Recognition];

    /// The suffix appended to the item id in the file name.
    #[must_use]
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            BlobRole::Main => None,
            BlobRole::Alternate => Some("alternate"),
            BlobRole::Recognition => Some("recognition"),
        }
    }
}

/// Address of one blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    /// Connection that owns the item.
    pub connection_id: u64,
    /// Provider-native id of the item.
    pub item_id: String,
    /// Role of the body.
    pub role: BlobRole,
}

impl BlobKey {
    /// Creates a blob key.
    pub fn new(connection_id: u64, item_id: impl Into<String>, role: BlobRole) -> Self {
        Self {
            connection_id,
            item_id: item_id.into(),
            role,
        }
    }

    /// File name without extension: `<item>` or `<item>_<role>`.
    #[must_use]
    pub fn base_name(&self) -> String {
        match self.role.suffix() {
            Some(suffix) => format!("{}_{}", self.item_id, suffix),
            None => self.item_id.clone(),
        }
    }

    /// Full file name for a body of the given mime type.
    #[must_use]
    pub fn file_name(&self, mime: Option<&str>) -> String {
        let extension = match self.role {
            BlobRole::Recognition => ".xml",
            _ => extension_for(mime),
        };
        format!("{}{}", self.base_name(), extension)
    }

    fn validate(&self) -> StorageResult<()> {
        let id = self.item_id.as_str();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(StorageError::InvalidBlobKey(format!(
                "item id {id:?} cannot be used as a file name"
            )));
        }
        Ok(())
    }
}

/// Storage for binary item bodies.
///
/// All operations are idempotent: writing the same key twice keeps only the
/// last body, deleting a missing blob is not an error.
pub trait BlobStore: Send + Sync {
    /// Writes (or replaces) the body stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    fn write(&self, key: &BlobKey, body: &[u8], mime: Option<&str>) -> StorageResult<()>;

    /// Reads the body stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the read fails.
    fn read(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>>;

    /// Deletes the body stored under `key`. Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the delete fails.
    fn delete(&self, key: &BlobKey) -> StorageResult<bool>;

    /// Deletes every blob of a connection. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn delete_connection(&self, connection_id: u64) -> StorageResult<usize>;

    /// Returns true if a body is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the lookup fails.
    fn exists(&self, key: &BlobKey) -> StorageResult<bool> {
        Ok(self.read(key)?.is_some())
    }
}

/// In-memory blob store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobKey, StoredBlob>>,
}

#[derive(Debug, Clone)]
struct StoredBlob {
    file_name: String,
    body: Vec<u8>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// File name the blob under `key` would have on disk.
    #[must_use]
    pub fn file_name(&self, key: &BlobKey) -> Option<String> {
        self.blobs.read().get(key).map(|b| b.file_name.clone())
    }

    /// All keys of one connection, sorted.
    #[must_use]
    pub fn keys_for(&self, connection_id: u64) -> Vec<BlobKey> {
        let mut keys: Vec<_> = self
            .blobs
            .read()
            .keys()
            .filter(|k| k.connection_id == connection_id)
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, key: &BlobKey, body: &[u8], mime: Option<&str>) -> StorageResult<()> {
        key.validate()?;
        self.blobs.write().insert(
            key.clone(),
            StoredBlob {
                file_name: key.file_name(mime),
                body: body.to_vec(),
            },
        );
        Ok(())
    }

    fn read(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
        key.validate()?;
        Ok(self.blobs.read().get(key).map(|b| b.body.clone()))
    }

    fn delete(&self, key: &BlobKey) -> StorageResult<bool> {
        key.validate()?;
        Ok(self.blobs.write().remove(key).is_some())
    }

    fn delete_connection(&self, connection_id: u64) -> StorageResult<usize> {
        let mut blobs = self.blobs.write();
        let before = blobs.len();
        blobs.retain(|k, _| k.connection_id != connection_id);
        Ok(before - blobs.len())
    }
}

/// Blob store writing one file per blob under a root directory.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never observes a half-written body.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn connection_dir(&self, connection_id: u64) -> PathBuf {
        self.root.join(connection_id.to_string())
    }

    /// Path the blob would be written to for the given mime type.
    #[must_use]
    pub fn path_for(&self, key: &BlobKey, mime: Option<&str>) -> PathBuf {
        self.connection_dir(key.connection_id)
            .join(key.file_name(mime))
    }

    /// Files currently holding the blob under `key` (any extension).
    fn existing_files(&self, key: &BlobKey) -> StorageResult<Vec<PathBuf>> {
        let dir = self.connection_dir(key.connection_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let base = key.base_name();
        let mut found = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path.file_name().is_some_and(|n| n == base.as_str())
                || path.file_stem().is_some_and(|s| s == base.as_str());
            if matches && path.is_file() {
                found.push(path);
            }
        }
        Ok(found)
    }
}

impl BlobStore for FileBlobStore {
    fn write(&self, key: &BlobKey, body: &[u8], mime: Option<&str>) -> StorageResult<()> {
        key.validate()?;
        let target = self.path_for(key, mime);
        let dir = self.connection_dir(key.connection_id);
        fs::create_dir_all(&dir)?;

        // A changed mime type would otherwise leave the old rendition behind.
        for stale in self.existing_files(key)? {
            if stale != target {
                fs::remove_file(&stale)?;
            }
        }

        let tmp = dir.join(format!(".{}.tmp", key.base_name()));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(body)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        debug!(path = %target.display(), bytes = body.len(), "blob written");
        Ok(())
    }

    fn read(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
        key.validate()?;
        match self.existing_files(key)?.first() {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &BlobKey) -> StorageResult<bool> {
        key.validate()?;
        let files = self.existing_files(key)?;
        for path in &files {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(!files.is_empty())
    }

    fn delete_connection(&self, connection_id: u64) -> StorageResult<usize> {
        let dir = self.connection_dir(connection_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let count = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .count();
        fs::remove_dir_all(&dir)?;
        Ok(count)
    }
}
