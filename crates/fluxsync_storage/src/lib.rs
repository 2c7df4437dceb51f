//! # Fluxsync Storage
//!
//! Lowest-level storage for Fluxsync.
//!
//! Two unrelated kinds of storage live here:
//!
//! - [`StorageBackend`]: an opaque, append-only byte medium. The facet
//!   database in `fluxsync_core` writes its journal to one of these and owns
//!   the record format entirely.
//! - [`BlobStore`]: keyed storage for the binary bodies that connectors pull
//!   down alongside facets (note attachments, recognition XML, thumbnails).
//!   Blobs are keyed by `(connection, item id, role)` so a retried write of the
//!   same body simply replaces the previous file.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] / [`MemoryBlobStore`] - tests and ephemeral runs
//! - [`FileBackend`] / [`FileBlobStore`] - persistent storage on the local disk
//!
//! ## Example
//!
//! ```rust
//! use fluxsync_storage::{BlobKey, BlobRole, BlobStore, MemoryBlobStore};
//!
//! let blobs = MemoryBlobStore::new();
//! let key = BlobKey::new(7, "c0ffee", BlobRole::Main);
//! blobs.write(&key, b"%PDF-1.4", Some("application/pdf")).unwrap();
//! assert!(blobs.exists(&key).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod blob;
mod error;
mod file;
mod memory;
mod mime;

pub use backend::StorageBackend;
pub use blob::{BlobKey, BlobRole, BlobStore, FileBlobStore, MemoryBlobStore};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use mime::extension_for;
