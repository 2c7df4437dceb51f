//! Provider item payloads.
//!
//! Every field is optional and absent fields are neither serialized nor
//! defaulted: the engine only applies a field to the stored facet when the
//! provider explicitly set it.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

fn require_guid<'a>(entity: &'static str, guid: Option<&'a str>) -> ProtocolResult<&'a str> {
    match guid {
        Some(guid) if !guid.trim().is_empty() => Ok(guid),
        Some(_) => Err(ProtocolError::invalid(entity, "empty guid")),
        None => Err(ProtocolError::invalid(entity, "missing guid")),
    }
}

/// A note as returned by the change feed or a full note fetch.
///
/// Change-feed notes carry metadata only; `content` and `resources` are
/// present after a full fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct NotePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_sequence_num: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notebook_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_guids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourcePayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<NoteAttributes>,
}

impl NotePayload {
    /// Returns the guid, or an error if it is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] for a missing or blank guid.
    pub fn require_guid(&self) -> ProtocolResult<&str> {
        require_guid("note", self.guid.as_deref())
    }

    /// Latitude, longitude and creation time, when all three are set.
    #[must_use]
    pub fn geotag(&self) -> Option<(f64, f64, i64)> {
        let attributes = self.attributes.as_ref()?;
        Some((attributes.latitude?, attributes.longitude?, self.created?))
    }
}

/// Optional note metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct NoteAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "sourceURL", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_done_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_edited_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_editor_id: Option<i32>,
}

/// A binary body with its hash and size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataBody {
    /// Raw bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,
    /// Provider hash of the body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_hash: Option<Vec<u8>>,
    /// Body size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
}

/// A resource (file attached to a note).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct ResourcePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recognition: Option<DataBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_data: Option<DataBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_sequence_num: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ResourceAttributes>,
}

impl ResourcePayload {
    /// Returns the guid, or an error if it is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] for a missing or blank guid.
    pub fn require_guid(&self) -> ProtocolResult<&str> {
        require_guid("resource", self.guid.as_deref())
    }

    /// Latitude, longitude and timestamp, when all three are set.
    #[must_use]
    pub fn geotag(&self) -> Option<(f64, f64, i64)> {
        let attributes = self.attributes.as_ref()?;
        Some((attributes.latitude?, attributes.longitude?, attributes.timestamp?))
    }
}

/// Optional resource metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct ResourceAttributes {
    #[serde(rename = "sourceURL", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reco_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<bool>,
}

/// Publishing settings of a notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Publishing {
    /// Public URI segment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Public description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_description: Option<String>,
}

/// A notebook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct NotebookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_sequence_num: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_notebook: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_updated: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publishing: Option<Publishing>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl NotebookPayload {
    /// Returns the guid, or an error if it is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] for a missing or blank guid.
    pub fn require_guid(&self) -> ProtocolResult<&str> {
        require_guid("notebook", self.guid.as_deref())
    }
}

/// A tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(missing_docs)]
pub struct TagPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_guid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_sequence_num: Option<i32>,
}

impl TagPayload {
    /// Returns the guid, or an error if it is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPayload`] for a missing or blank guid.
    pub fn require_guid(&self) -> ProtocolResult<&str> {
        require_guid("tag", self.guid.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_stay_absent() {
        let note: NotePayload = serde_json::from_str(r#"{"guid":"n1","title":"t"}"#).unwrap();
        assert_eq!(note.title.as_deref(), Some("t"));
        assert_eq!(note.content, None);
        assert_eq!(note.attributes, None);
        assert_eq!(serde_json::to_string(&note).unwrap(), r#"{"guid":"n1","title":"t"}"#);
    }

    #[test]
    fn provider_field_names() {
        let note: NotePayload = serde_json::from_str(
            r#"{"guid":"n1","updateSequenceNum":4,"notebookGuid":"nb",
                "attributes":{"sourceURL":"http://x","latitude":1.5}}"#,
        )
        .unwrap();
        assert_eq!(note.update_sequence_num, Some(4));
        assert_eq!(note.notebook_guid.as_deref(), Some("nb"));
        let attributes = note.attributes.unwrap();
        assert_eq!(attributes.source_url.as_deref(), Some("http://x"));
        assert_eq!(attributes.latitude, Some(1.5));
    }

    #[test]
    fn guid_validation() {
        assert_eq!(
            NotePayload {
                guid: Some("n1".into()),
                ..NotePayload::default()
            }
            .require_guid()
            .unwrap(),
            "n1"
        );
        assert!(NotePayload::default().require_guid().is_err());
        assert!(TagPayload {
            guid: Some("  ".into()),
            ..TagPayload::default()
        }
        .require_guid()
        .is_err());
    }

    #[test]
    fn geotags_need_all_three_parts() {
        let mut note = NotePayload {
            created: Some(10),
            attributes: Some(NoteAttributes {
                latitude: Some(1.0),
                longitude: Some(2.0),
                ..NoteAttributes::default()
            }),
            ..NotePayload::default()
        };
        assert_eq!(note.geotag(), Some((1.0, 2.0, 10)));
        note.created = None;
        assert_eq!(note.geotag(), None);

        let resource = ResourcePayload {
            attributes: Some(ResourceAttributes {
                latitude: Some(1.0),
                timestamp: Some(5),
                ..ResourceAttributes::default()
            }),
            ..ResourcePayload::default()
        };
        assert_eq!(resource.geotag(), None);
    }
}
