//! Facet predicates.

use crate::facet::Facet;
use crate::types::FacetKind;

/// Selects facets of one kind within a connection.
///
/// A query with a provider id matches at most one facet, which is what
/// [`crate::FacetStore::upsert`] expects. A query with only a parent id
/// selects every facet referencing that parent (the notes of a notebook, the
/// resources of a note).
///
/// ```rust
/// use fluxsync_core::{FacetKind, FacetQuery};
///
/// let by_id = FacetQuery::by_id(FacetKind::Note, "8f0e");
/// let children = FacetQuery::kind(FacetKind::Resource).with_parent("8f0e");
/// assert_eq!(by_id.provider_id(), Some("8f0e"));
/// assert_eq!(children.parent_id(), Some("8f0e"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetQuery {
    kind: FacetKind,
    provider_id: Option<String>,
    parent_id: Option<String>,
}

impl FacetQuery {
    /// Matches every facet of `kind`.
    #[must_use]
    pub fn kind(kind: FacetKind) -> Self {
        Self {
            kind,
            provider_id: None,
            parent_id: None,
        }
    }

    /// Matches the facet of `kind` with the given provider id.
    #[must_use]
    pub fn by_id(kind: FacetKind, provider_id: impl Into<String>) -> Self {
        Self::kind(kind).with_provider_id(provider_id)
    }

    /// Restricts the query to one provider id.
    #[must_use]
    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    /// Restricts the query to facets referencing `parent_id`.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Kind targeted by the query.
    #[must_use]
    pub const fn target_kind(&self) -> FacetKind {
        self.kind
    }

    /// Provider id constraint, if any.
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.provider_id.as_deref()
    }

    /// Parent id constraint, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Returns true if `facet` satisfies every constraint.
    #[must_use]
    pub fn matches(&self, facet: &Facet) -> bool {
        if facet.kind() != self.kind {
            return false;
        }
        if let Some(id) = &self.provider_id {
            if facet.provider_id != *id {
                return false;
            }
        }
        if let Some(parent) = &self.parent_id {
            if facet.parent_id() != Some(parent.as_str()) {
                return false;
            }
        }
        true
    }
}
