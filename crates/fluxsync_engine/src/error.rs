//! Error types for the sync engine.

use fluxsync_core::{ConnectionId, CoreError};
use fluxsync_protocol::ProtocolError;
use fluxsync_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The provider asked us to back off.
    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited {
        /// How long the provider wants us to wait.
        retry_after: Duration,
    },

    /// The stored credentials were rejected.
    #[error("authorization expired: {0}")]
    AuthExpired(String),

    /// Network failure or provider-side error worth retrying.
    #[error("transient provider error: {message}")]
    TransientProvider {
        /// Error message.
        message: String,
    },

    /// The provider rejected the request for a reason retrying will not fix.
    #[error("provider error {status}: {message}")]
    Provider {
        /// Status code reported by the provider.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Facet or attribute storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// Blob storage failed.
    #[error("blob storage error: {0}")]
    Blob(#[from] StorageError),

    /// A provider item could not be understood.
    #[error("malformed {entity}: {message}")]
    DataIntegrity {
        /// Kind of item, e.g. `note`.
        entity: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Successive pages stopped advancing the change feed.
    #[error("change feed did not advance past usn {after_usn}")]
    FeedStalled {
        /// Cursor the stalled page was requested with.
        after_usn: i32,
    },

    /// The connection is not registered.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// No client can be built for the connection's provider.
    #[error("no client for provider '{0}'")]
    UnsupportedProvider(String),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// The cleanup queue no longer accepts jobs.
    #[error("cleanup queue is shut down")]
    QueueClosed,
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retry after the provider's delay.
    RateLimited,
    /// Needs user action.
    AuthExpired,
    /// Retry with backoff.
    TransientProvider,
    /// Fatal for the cycle.
    Storage,
    /// Skip the item and continue.
    DataIntegrity,
    /// Cycle aborted on request.
    Cancelled,
    /// Any other failure.
    Other,
}

impl SyncError {
    /// Creates a transient provider error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientProvider {
            message: message.into(),
        }
    }

    /// Creates a data integrity error.
    pub fn data_integrity(entity: &'static str, message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            entity,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried with backoff.
    ///
    /// Rate limits carry their own delay and are handled by the scheduler,
    /// so they are not retryable here.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientProvider { .. })
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::RateLimited { .. } => ErrorKind::RateLimited,
            SyncError::AuthExpired(_) => ErrorKind::AuthExpired,
            SyncError::TransientProvider { .. } => ErrorKind::TransientProvider,
            SyncError::Storage(_) | SyncError::Blob(_) => ErrorKind::Storage,
            SyncError::DataIntegrity { .. } => ErrorKind::DataIntegrity,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Provider { .. }
            | SyncError::FeedStalled { .. }
            | SyncError::UnknownConnection(_)
            | SyncError::UnsupportedProvider(_)
            | SyncError::QueueClosed => ErrorKind::Other,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Json(e) => SyncError::data_integrity("document", e.to_string()),
            ProtocolError::InvalidPayload { entity, message } => {
                SyncError::DataIntegrity { entity, message }
            }
        }
    }
}
