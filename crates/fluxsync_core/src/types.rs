//! Core type definitions for Fluxsync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one user's link to one provider (an "API key").
///
/// Every facet, checkpoint and blob belongs to exactly one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Creates a connection id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user account owning connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestId(pub u64);

impl GuestId {
    /// Creates a guest id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of record a facet holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetKind {
    /// A note (leaf item, lives in a notebook).
    Note,
    /// A binary resource attached to a note.
    Resource,
    /// A notebook (container of notes).
    Notebook,
    /// A tag.
    Tag,
    /// A location derived from a geotagged item.
    Location,
}

impl FacetKind {
    /// All kinds, in reconciliation order.
    pub const ALL: [FacetKind; 5] = [
        FacetKind::Tag,
        FacetKind::Notebook,
        FacetKind::Note,
        FacetKind::Resource,
        FacetKind::Location,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FacetKind::Note => "note",
            FacetKind::Resource => "resource",
            FacetKind::Notebook => "notebook",
            FacetKind::Tag => "tag",
            FacetKind::Location => "location",
        }
    }

    /// Parses a lowercase name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for FacetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inclusive window of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// First millisecond of the window.
    pub start: i64,
    /// Last millisecond of the window.
    pub end: i64,
}

impl TimeRange {
    /// Creates a window; the bounds are swapped if given in reverse.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Returns true if `[start, end]` overlaps this window.
    #[must_use]
    pub const fn overlaps(&self, start: i64, end: i64) -> bool {
        start <= self.end && end >= self.start
    }
}
