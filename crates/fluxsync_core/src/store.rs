//! Store contracts consumed by the sync engine and the read side.

use crate::error::CoreResult;
use crate::facet::Facet;
use crate::query::FacetQuery;
use crate::types::{ConnectionId, FacetKind, TimeRange};

/// Merge function handed to [`FacetStore::upsert`].
///
/// Receives the stored facet (or `None` when creating) and returns the facet
/// to store.
pub type MergeFn<'a> = dyn FnMut(Option<Facet>) -> CoreResult<Facet> + 'a;

/// Durable keyed storage for facets.
///
/// Facets are partitioned by connection; every method takes the connection it
/// operates on and never touches facets of another one.
pub trait FacetStore: Send + Sync {
    /// Returns the single facet matching `query`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::AmbiguousQuery`] if more than one facet
    /// matches.
    fn find_one(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<Option<Facet>>;

    /// Returns every facet matching `query`, ordered by provider id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_where(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<Vec<Facet>>;

    /// Atomically reads the facet matching `query`, passes it to `merge` and
    /// stores the result.
    ///
    /// The stored facet is replaced in one step. If `merge` fails nothing is
    /// written. `merge` runs while the store is locked and must not call back
    /// into the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the query is ambiguous, `merge` fails, or the
    /// merged facet belongs to a different connection, kind or provider id.
    fn upsert(
        &self,
        connection_id: ConnectionId,
        query: &FacetQuery,
        merge: &mut MergeFn<'_>,
    ) -> CoreResult<Facet>;

    /// Deletes every facet matching `query` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn delete_where(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<usize>;

    /// Deletes every facet of the connection and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion cannot be persisted.
    fn erase_all(&self, connection_id: ConnectionId) -> CoreResult<usize>;

    /// Returns facets of `kind` whose `[start, end]` overlaps `range`,
    /// ordered by start time. Facets without a start are never returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_in_range(
        &self,
        connection_id: ConnectionId,
        kind: FacetKind,
        range: TimeRange,
    ) -> CoreResult<Vec<Facet>>;

    /// Number of facets stored for the connection, optionally of one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn count(&self, connection_id: ConnectionId, kind: Option<FacetKind>) -> CoreResult<usize>;
}

/// Per-connection key/value storage for checkpoints and tokens.
pub trait AttributeStore: Send + Sync {
    /// Reads an attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, connection_id: ConnectionId, key: &str) -> CoreResult<Option<String>>;

    /// Writes an attribute, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write cannot be persisted.
    fn set(&self, connection_id: ConnectionId, key: &str, value: &str) -> CoreResult<()>;

    /// Removes an attribute and reports whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove(&self, connection_id: ConnectionId, key: &str) -> CoreResult<bool>;

    /// Removes every attribute of the connection and returns how many existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove_all(&self, connection_id: ConnectionId) -> CoreResult<usize>;
}
