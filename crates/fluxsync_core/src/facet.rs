//! The facet model.
//!
//! A facet is the normalized, stored form of one provider item. Every field
//! that comes from the provider is optional: a provider payload that omits a
//! field leaves the stored value alone, so "absent" and "default" must stay
//! distinguishable all the way down to storage.

use crate::types::{ConnectionId, FacetKind};
use serde::{Deserialize, Serialize};

/// A normalized record derived from one provider item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    /// Owning connection.
    pub connection_id: ConnectionId,
    /// Provider-native identifier (the item guid).
    pub provider_id: String,
    /// Provider update sequence number of the last applied payload.
    pub usn: Option<i32>,
    /// First millisecond the record pertains to.
    pub start: Option<i64>,
    /// Last millisecond the record pertains to.
    pub end: Option<i64>,
    /// Local wall-clock time of the last write, in epoch milliseconds.
    pub time_updated: i64,
    /// Kind-specific payload.
    pub body: FacetBody,
}

impl Facet {
    /// Creates an empty facet for `provider_id` with the given body.
    #[must_use]
    pub fn new(connection_id: ConnectionId, provider_id: impl Into<String>, body: FacetBody) -> Self {
        Self {
            connection_id,
            provider_id: provider_id.into(),
            usn: None,
            start: None,
            end: None,
            time_updated: 0,
            body,
        }
    }

    /// The facet's kind, derived from its body.
    #[must_use]
    pub fn kind(&self) -> FacetKind {
        self.body.kind()
    }

    /// Provider id of the facet this one references, if any.
    ///
    /// Notes reference their notebook, resources their note and derived
    /// locations the item they were extracted from.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        match &self.body {
            FacetBody::Note(note) => note.notebook_guid.as_deref(),
            FacetBody::Resource(resource) => resource.note_guid.as_deref(),
            FacetBody::Location(location) => Some(location.source_item.as_str()),
            FacetBody::Notebook(_) | FacetBody::Tag(_) => None,
        }
    }

    /// Sets `start` and `end` to the same instant.
    pub fn set_instant(&mut self, at: i64) {
        self.start = Some(at);
        self.end = Some(at);
    }
}

/// Kind-specific facet payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FacetBody {
    /// A note.
    Note(NoteFacet),
    /// A resource attached to a note.
    Resource(ResourceFacet),
    /// A notebook.
    Notebook(NotebookFacet),
    /// A tag.
    Tag(TagFacet),
    /// A derived location.
    Location(LocationFacet),
}

impl FacetBody {
    /// The kind this body belongs to.
    #[must_use]
    pub const fn kind(&self) -> FacetKind {
        match self {
            FacetBody::Note(_) => FacetKind::Note,
            FacetBody::Resource(_) => FacetKind::Resource,
            FacetBody::Notebook(_) => FacetKind::Notebook,
            FacetBody::Tag(_) => FacetKind::Tag,
            FacetBody::Location(_) => FacetKind::Location,
        }
    }

    /// Returns the note payload, if this is a note.
    #[must_use]
    pub fn as_note(&self) -> Option<&NoteFacet> {
        match self {
            FacetBody::Note(note) => Some(note),
            _ => None,
        }
    }

    /// Returns the resource payload, if this is a resource.
    #[must_use]
    pub fn as_resource(&self) -> Option<&ResourceFacet> {
        match self {
            FacetBody::Resource(resource) => Some(resource),
            _ => None,
        }
    }

    /// Returns the notebook payload, if this is a notebook.
    #[must_use]
    pub fn as_notebook(&self) -> Option<&NotebookFacet> {
        match self {
            FacetBody::Notebook(notebook) => Some(notebook),
            _ => None,
        }
    }

    /// Returns the tag payload, if this is a tag.
    #[must_use]
    pub fn as_tag(&self) -> Option<&TagFacet> {
        match self {
            FacetBody::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    /// Returns the location payload, if this is a location.
    #[must_use]
    pub fn as_location(&self) -> Option<&LocationFacet> {
        match self {
            FacetBody::Location(location) => Some(location),
            _ => None,
        }
    }
}

/// Stored fields of a note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NoteFacet {
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<Vec<u8>>,
    pub content_length: Option<i32>,
    pub created: Option<i64>,
    pub updated: Option<i64>,
    pub deleted: Option<i64>,
    pub active: Option<bool>,
    pub notebook_guid: Option<String>,
    pub tag_names: Option<Vec<String>>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub source_application: Option<String>,
    pub place_name: Option<String>,
    pub content_class: Option<String>,
    pub subject_date: Option<i64>,
    pub share_date: Option<i64>,
    pub reminder_order: Option<i64>,
    pub reminder_time: Option<i64>,
    pub reminder_done_time: Option<i64>,
    pub last_edited_by: Option<String>,
    pub creator_id: Option<i32>,
    pub last_editor_id: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// Stored fields of a resource. Binary bodies live in the blob store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ResourceFacet {
    pub note_guid: Option<String>,
    pub mime: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub data_hash: Option<Vec<u8>>,
    pub data_size: Option<i32>,
    pub alternate_data_hash: Option<Vec<u8>>,
    pub alternate_data_size: Option<i32>,
    pub recognition_data_hash: Option<Vec<u8>>,
    pub recognition_data_size: Option<i32>,
    pub file_name: Option<String>,
    pub is_attachment: Option<bool>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub reco_type: Option<String>,
    pub source_url: Option<String>,
    pub timestamp: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
}

/// Stored fields of a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct NotebookFacet {
    pub name: Option<String>,
    pub stack: Option<String>,
    pub default_notebook: Option<bool>,
    pub published: Option<bool>,
    pub publishing_uri: Option<String>,
    pub service_created: Option<i64>,
    pub service_updated: Option<i64>,
}

/// Stored fields of a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct TagFacet {
    pub name: Option<String>,
    pub parent_guid: Option<String>,
}

/// Where a derived location came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Geotag on an Evernote note or resource.
    Evernote,
    /// Any other provider, by name.
    Other(String),
}

/// A location fix extracted from a geotagged item.
///
/// Stored under the provider id of the item it came from so re-running a
/// cycle overwrites rather than duplicates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFacet {
    /// Provider id of the source item.
    pub source_item: String,
    /// Kind of the source item.
    pub source_kind: FacetKind,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Altitude in whole meters.
    pub altitude: Option<i32>,
    /// When the fix was taken, in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Provider that produced the fix.
    pub source: LocationSource,
}
