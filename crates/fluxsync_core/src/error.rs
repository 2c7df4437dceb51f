//! Error types for Fluxsync core.

use crate::types::{ConnectionId, FacetKind};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the facet and attribute stores and the registries.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend or blob store error.
    #[error("storage error: {0}")]
    Storage(#[from] fluxsync_storage::StorageError),

    /// I/O error outside a storage backend (directory handling).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A journal record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal is corrupted somewhere other than its tail.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the offending record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// An upsert predicate matched more than one facet.
    #[error("query for {kind} on connection {connection_id} matched {matches} facets, expected at most one")]
    AmbiguousQuery {
        /// Connection the query ran against.
        connection_id: ConnectionId,
        /// Kind the query targeted.
        kind: FacetKind,
        /// Number of matching facets.
        matches: usize,
    },

    /// A merge function returned a facet that does not fit the upsert key.
    #[error("merge produced an invalid facet: {message}")]
    InvalidMerge {
        /// Why the facet was rejected.
        message: String,
    },

    /// The connection does not exist (or was removed).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The provider name is not registered.
    #[error("unknown provider {0:?}")]
    UnknownProvider(String),

    /// A provider attribute required at connection creation has no value.
    #[error("no value for attribute {key:?} required by provider {provider:?}")]
    MissingAttribute {
        /// Provider being connected.
        provider: String,
        /// Attribute key without a value.
        key: String,
    },

    /// A connection with this id is already registered.
    #[error("connection {0} already exists")]
    ConnectionExists(ConnectionId),
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates a journal corruption error.
    pub fn journal_corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Creates an invalid merge error.
    pub fn invalid_merge(message: impl Into<String>) -> Self {
        Self::InvalidMerge {
            message: message.into(),
        }
    }
}
