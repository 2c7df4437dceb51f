//! Reconciliation of provider payloads into facets.
//!
//! Every payload field is optional. A field the payload leaves unset never
//! overwrites what is stored: a facet only ever gains or replaces values,
//! it does not lose them to a partial payload.

use crate::error::SyncResult;
use crate::stats::CycleStats;
use fluxsync_core::{
    ConnectionId, CoreError, CoreResult, Facet, FacetBody, FacetKind, FacetQuery, FacetStore,
    LocationFacet, LocationSource, NoteFacet, NotebookFacet, ResourceFacet, TagFacet,
};
use fluxsync_protocol::{
    DataBody, NotePayload, NotebookPayload, ResourcePayload, SyncChunk, TagPayload,
};
use fluxsync_storage::{BlobKey, BlobRole, BlobStore};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Upserts and expunges of one cycle, unioned across its pages.
///
/// An id that is both upserted and expunged within the cycle is dropped
/// from the upserts and listed in `contested`.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub tags: BTreeMap<String, TagPayload>,
    pub notebooks: BTreeMap<String, NotebookPayload>,
    pub notes: BTreeMap<String, NotePayload>,
    pub resources: BTreeMap<String, ResourcePayload>,
    pub expunged_tags: BTreeSet<String>,
    pub expunged_notebooks: BTreeSet<String>,
    pub expunged_notes: BTreeSet<String>,
    pub contested: Vec<(FacetKind, String)>,
    pub malformed: usize,
}

impl ChangeSet {
    pub fn from_chunks(chunks: &[SyncChunk]) -> Self {
        let mut set = Self::default();

        for chunk in chunks {
            set.expunged_tags.extend(chunk.expunged_tags.iter().cloned());
            set.expunged_notebooks
                .extend(chunk.expunged_notebooks.iter().cloned());
            set.expunged_notes.extend(chunk.expunged_notes.iter().cloned());

            // Later pages carry later versions, so inserting in page order
            // keeps the newest payload per id.
            for tag in &chunk.tags {
                collect(&mut set.tags, &mut set.malformed, tag.require_guid(), tag);
            }
            for notebook in &chunk.notebooks {
                collect(
                    &mut set.notebooks,
                    &mut set.malformed,
                    notebook.require_guid(),
                    notebook,
                );
            }
            for note in &chunk.notes {
                collect(&mut set.notes, &mut set.malformed, note.require_guid(), note);
            }
            for resource in &chunk.resources {
                collect(
                    &mut set.resources,
                    &mut set.malformed,
                    resource.require_guid(),
                    resource,
                );
            }
        }

        drop_expunged(
            &mut set.tags,
            &set.expunged_tags,
            FacetKind::Tag,
            &mut set.contested,
        );
        drop_expunged(
            &mut set.notebooks,
            &set.expunged_notebooks,
            FacetKind::Notebook,
            &mut set.contested,
        );
        drop_expunged(
            &mut set.notes,
            &set.expunged_notes,
            FacetKind::Note,
            &mut set.contested,
        );
        // Resources of an expunged note go with it.
        let expunged_notes = &set.expunged_notes;
        set.resources.retain(|_, resource| {
            resource
                .note_guid
                .as_ref()
                .map_or(true, |note| !expunged_notes.contains(note))
        });

        set
    }
}

fn collect<T: Clone>(
    into: &mut BTreeMap<String, T>,
    malformed: &mut usize,
    guid: fluxsync_protocol::ProtocolResult<&str>,
    payload: &T,
) {
    match guid {
        Ok(guid) => {
            into.insert(guid.to_string(), payload.clone());
        }
        Err(e) => {
            warn!(error = %e, "skipping malformed item");
            *malformed += 1;
        }
    }
}

fn drop_expunged<T>(
    upserts: &mut BTreeMap<String, T>,
    expunged: &BTreeSet<String>,
    kind: FacetKind,
    contested: &mut Vec<(FacetKind, String)>,
) {
    upserts.retain(|guid, _| {
        if expunged.contains(guid) {
            debug!(%kind, guid = %guid, "upsert superseded by expunge");
            contested.push((kind, guid.clone()));
            false
        } else {
            true
        }
    });
}

fn apply<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if let Some(value) = value {
        *target = Some(value.clone());
    }
}

fn mismatch(facet: &Facet, expected: FacetKind) -> CoreError {
    CoreError::invalid_merge(format!(
        "facet {} is a {}, expected a {expected}",
        facet.provider_id,
        facet.kind()
    ))
}

fn empty_body(kind: FacetKind) -> FacetBody {
    match kind {
        FacetKind::Note => FacetBody::Note(NoteFacet::default()),
        FacetKind::Resource => FacetBody::Resource(ResourceFacet::default()),
        FacetKind::Notebook => FacetBody::Notebook(NotebookFacet::default()),
        FacetKind::Tag | FacetKind::Location => FacetBody::Tag(TagFacet::default()),
    }
}

fn is_stale(stored: Option<i32>, incoming: Option<i32>) -> bool {
    matches!((stored, incoming), (Some(stored), Some(incoming)) if incoming < stored)
}

/// Applies a tag payload to a tag facet.
pub fn merge_tag(facet: &mut Facet, payload: &TagPayload) -> CoreResult<()> {
    let FacetBody::Tag(tag) = &mut facet.body else {
        return Err(mismatch(facet, FacetKind::Tag));
    };
    apply(&mut tag.name, &payload.name);
    apply(&mut tag.parent_guid, &payload.parent_guid);
    Ok(())
}

/// Applies a notebook payload to a notebook facet.
pub fn merge_notebook(facet: &mut Facet, payload: &NotebookPayload) -> CoreResult<()> {
    let FacetBody::Notebook(notebook) = &mut facet.body else {
        return Err(mismatch(facet, FacetKind::Notebook));
    };
    apply(&mut notebook.name, &payload.name);
    apply(&mut notebook.stack, &payload.stack);
    apply(&mut notebook.default_notebook, &payload.default_notebook);
    apply(&mut notebook.published, &payload.published);
    apply(&mut notebook.service_created, &payload.service_created);
    apply(&mut notebook.service_updated, &payload.service_updated);
    if let Some(publishing) = &payload.publishing {
        apply(&mut notebook.publishing_uri, &publishing.uri);
    }
    Ok(())
}

/// Applies a note payload to a note facet.
///
/// The facet's instant is the note's update time, or its creation time when
/// the payload carries no update time.
pub fn merge_note(facet: &mut Facet, payload: &NotePayload) -> CoreResult<()> {
    let FacetBody::Note(note) = &mut facet.body else {
        return Err(mismatch(facet, FacetKind::Note));
    };
    apply(&mut note.title, &payload.title);
    apply(&mut note.content, &payload.content);
    apply(&mut note.content_hash, &payload.content_hash);
    apply(&mut note.content_length, &payload.content_length);
    apply(&mut note.created, &payload.created);
    apply(&mut note.updated, &payload.updated);
    apply(&mut note.deleted, &payload.deleted);
    apply(&mut note.active, &payload.active);
    apply(&mut note.notebook_guid, &payload.notebook_guid);
    apply(&mut note.tag_names, &payload.tag_names);

    if let Some(attributes) = &payload.attributes {
        apply(&mut note.author, &attributes.author);
        apply(&mut note.source, &attributes.source);
        apply(&mut note.source_url, &attributes.source_url);
        apply(&mut note.source_application, &attributes.source_application);
        apply(&mut note.place_name, &attributes.place_name);
        apply(&mut note.content_class, &attributes.content_class);
        apply(&mut note.subject_date, &attributes.subject_date);
        apply(&mut note.share_date, &attributes.share_date);
        apply(&mut note.reminder_order, &attributes.reminder_order);
        apply(&mut note.reminder_time, &attributes.reminder_time);
        apply(&mut note.reminder_done_time, &attributes.reminder_done_time);
        apply(&mut note.last_edited_by, &attributes.last_edited_by);
        apply(&mut note.creator_id, &attributes.creator_id);
        apply(&mut note.last_editor_id, &attributes.last_editor_id);
        apply(&mut note.latitude, &attributes.latitude);
        apply(&mut note.longitude, &attributes.longitude);
        apply(&mut note.altitude, &attributes.altitude);
    }

    if let Some(created) = payload.created {
        facet.set_instant(created);
    }
    if let Some(updated) = payload.updated {
        facet.set_instant(updated);
    }
    Ok(())
}

fn apply_data(hash: &mut Option<Vec<u8>>, size: &mut Option<i32>, data: &Option<DataBody>) {
    if let Some(data) = data {
        apply(hash, &data.body_hash);
        apply(size, &data.size);
    }
}

/// Applies a resource payload to a resource facet.
pub fn merge_resource(facet: &mut Facet, payload: &ResourcePayload) -> CoreResult<()> {
    let FacetBody::Resource(resource) = &mut facet.body else {
        return Err(mismatch(facet, FacetKind::Resource));
    };
    apply(&mut resource.note_guid, &payload.note_guid);
    apply(&mut resource.mime, &payload.mime);
    apply(&mut resource.width, &payload.width);
    apply(&mut resource.height, &payload.height);
    apply_data(&mut resource.data_hash, &mut resource.data_size, &payload.data);
    apply_data(
        &mut resource.alternate_data_hash,
        &mut resource.alternate_data_size,
        &payload.alternate_data,
    );
    apply_data(
        &mut resource.recognition_data_hash,
        &mut resource.recognition_data_size,
        &payload.recognition,
    );

    if let Some(attributes) = &payload.attributes {
        apply(&mut resource.source_url, &attributes.source_url);
        apply(&mut resource.timestamp, &attributes.timestamp);
        apply(&mut resource.latitude, &attributes.latitude);
        apply(&mut resource.longitude, &attributes.longitude);
        apply(&mut resource.altitude, &attributes.altitude);
        apply(&mut resource.camera_make, &attributes.camera_make);
        apply(&mut resource.camera_model, &attributes.camera_model);
        apply(&mut resource.reco_type, &attributes.reco_type);
        apply(&mut resource.file_name, &attributes.file_name);
        apply(&mut resource.is_attachment, &attributes.attachment);

        if let Some(timestamp) = attributes.timestamp {
            facet.set_instant(timestamp);
        }
    }
    Ok(())
}

/// Writes one connection's payloads into the facet and blob stores.
pub(crate) struct Reconciler<'a> {
    connection_id: ConnectionId,
    facets: &'a dyn FacetStore,
    blobs: &'a dyn BlobStore,
    location_source: LocationSource,
    now: i64,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        connection_id: ConnectionId,
        provider: &str,
        facets: &'a dyn FacetStore,
        blobs: &'a dyn BlobStore,
        now: i64,
    ) -> Self {
        let location_source = match provider {
            "evernote" => LocationSource::Evernote,
            other => LocationSource::Other(other.to_string()),
        };
        Self {
            connection_id,
            facets,
            blobs,
            location_source,
            now,
        }
    }

    fn stored(&self, kind: FacetKind, guid: &str) -> SyncResult<Option<Facet>> {
        Ok(self
            .facets
            .find_one(self.connection_id, &FacetQuery::by_id(kind, guid))?)
    }

    /// Read-modify-write of one facet. Returns false if the stored facet has
    /// a newer USN and was left alone.
    fn upsert(
        &self,
        kind: FacetKind,
        guid: &str,
        usn: Option<i32>,
        merge: impl Fn(&mut Facet) -> CoreResult<()>,
    ) -> SyncResult<bool> {
        let connection_id = self.connection_id;
        let now = self.now;
        let mut applied = true;

        self.facets.upsert(
            connection_id,
            &FacetQuery::by_id(kind, guid),
            &mut |current: Option<Facet>| {
                let mut facet = match current {
                    Some(current) if is_stale(current.usn, usn) => {
                        applied = false;
                        return Ok(current);
                    }
                    Some(current) => current,
                    None => Facet::new(connection_id, guid, empty_body(kind)),
                };
                merge(&mut facet)?;
                if usn.is_some() {
                    facet.usn = usn;
                }
                facet.time_updated = now;
                Ok(facet)
            },
        )?;
        Ok(applied)
    }

    fn record(&self, stats: &mut CycleStats, kind: FacetKind, guid: &str, applied: bool) {
        if applied {
            stats.upserted.add(kind, 1);
        } else {
            debug!(%kind, guid, "stored facet is newer, payload ignored");
            stats.stale += 1;
        }
    }

    pub fn tag(&self, guid: &str, payload: &TagPayload, stats: &mut CycleStats) -> SyncResult<()> {
        let applied = self.upsert(FacetKind::Tag, guid, payload.update_sequence_num, |facet| {
            merge_tag(facet, payload)
        })?;
        self.record(stats, FacetKind::Tag, guid, applied);
        Ok(())
    }

    pub fn notebook(
        &self,
        guid: &str,
        payload: &NotebookPayload,
        stats: &mut CycleStats,
    ) -> SyncResult<()> {
        let applied = self.upsert(
            FacetKind::Notebook,
            guid,
            payload.update_sequence_num,
            |facet| merge_notebook(facet, payload),
        )?;
        self.record(stats, FacetKind::Notebook, guid, applied);
        Ok(())
    }

    /// Reconciles a fully fetched note: its resources and their bodies
    /// first, then the note, then its derived location.
    pub fn note(&self, guid: &str, payload: &NotePayload, stats: &mut CycleStats) -> SyncResult<()> {
        if let Some(stored) = self.stored(FacetKind::Note, guid)? {
            if is_stale(stored.usn, payload.update_sequence_num) {
                self.record(stats, FacetKind::Note, guid, false);
                return Ok(());
            }
        }

        for resource in payload.resources.iter().flatten() {
            match resource.require_guid() {
                Ok(resource_guid) => self.resource_of(resource_guid, resource, Some(guid), stats)?,
                Err(e) => {
                    warn!(note = guid, error = %e, "skipping malformed resource");
                    stats.skipped += 1;
                }
            }
        }

        let applied = self.upsert(FacetKind::Note, guid, payload.update_sequence_num, |facet| {
            merge_note(facet, payload)
        })?;
        self.record(stats, FacetKind::Note, guid, applied);

        if applied {
            if let Some(geotag) = payload.geotag() {
                let altitude = payload.attributes.as_ref().and_then(|a| a.altitude);
                self.location(FacetKind::Note, guid, geotag, altitude, stats)?;
            }
        }
        Ok(())
    }

    /// Reconciles a resource reported on its own in a page.
    pub fn resource(
        &self,
        guid: &str,
        payload: &ResourcePayload,
        stats: &mut CycleStats,
    ) -> SyncResult<()> {
        self.resource_of(guid, payload, None, stats)
    }

    fn resource_of(
        &self,
        guid: &str,
        payload: &ResourcePayload,
        parent_note: Option<&str>,
        stats: &mut CycleStats,
    ) -> SyncResult<()> {
        let stored = self.stored(FacetKind::Resource, guid)?;
        if stored
            .as_ref()
            .is_some_and(|s| is_stale(s.usn, payload.update_sequence_num))
        {
            self.record(stats, FacetKind::Resource, guid, false);
            return Ok(());
        }
        let stored_resource = stored.as_ref().and_then(|s| s.body.as_resource());

        let mime = payload
            .mime
            .as_deref()
            .or_else(|| stored_resource.and_then(|r| r.mime.as_deref()));
        let bodies = [
            (BlobRole::Main, &payload.data),
            (BlobRole::Alternate, &payload.alternate_data),
            (BlobRole::Recognition, &payload.recognition),
        ];
        for (role, data) in bodies {
            let Some(data) = data else { continue };
            let Some(body) = data.body.as_deref() else {
                continue;
            };
            let key = BlobKey::new(self.connection_id.as_u64(), guid, role);

            let stored_hash = stored_resource.and_then(|r| match role {
                BlobRole::Main => r.data_hash.as_ref(),
                BlobRole::Alternate => r.alternate_data_hash.as_ref(),
                BlobRole::Recognition => r.recognition_data_hash.as_ref(),
            });
            // Without a hash, compare against the stored bytes.
            let unchanged = match &data.body_hash {
                Some(hash) => Some(hash) == stored_hash && self.blobs.exists(&key)?,
                None => self.blobs.read(&key)?.as_deref() == Some(body),
            };
            if unchanged {
                continue;
            }

            self.blobs.write(&key, body, mime)?;
            stats.blobs_written += 1;
        }

        let applied = self.upsert(
            FacetKind::Resource,
            guid,
            payload.update_sequence_num,
            |facet| {
                merge_resource(facet, payload)?;
                if let (FacetBody::Resource(resource), Some(parent)) = (&mut facet.body, parent_note) {
                    if resource.note_guid.is_none() {
                        resource.note_guid = Some(parent.to_string());
                    }
                }
                Ok(())
            },
        )?;
        self.record(stats, FacetKind::Resource, guid, applied);

        if applied {
            if let Some(geotag) = payload.geotag() {
                let altitude = payload.attributes.as_ref().and_then(|a| a.altitude);
                self.location(FacetKind::Resource, guid, geotag, altitude, stats)?;
            }
        }
        Ok(())
    }

    /// Writes the location derived from a geotagged item, keyed by the
    /// item's id.
    fn location(
        &self,
        source_kind: FacetKind,
        source_item: &str,
        (latitude, longitude, timestamp_ms): (f64, f64, i64),
        altitude: Option<f64>,
        stats: &mut CycleStats,
    ) -> SyncResult<()> {
        let connection_id = self.connection_id;
        let now = self.now;
        let location = LocationFacet {
            source_item: source_item.to_string(),
            source_kind,
            latitude,
            longitude,
            // Whole meters, truncated.
            altitude: altitude.map(|a| a as i32),
            timestamp_ms,
            source: self.location_source.clone(),
        };

        self.facets.upsert(
            connection_id,
            &FacetQuery::by_id(FacetKind::Location, source_item),
            &mut |_current: Option<Facet>| {
                let mut facet = Facet::new(
                    connection_id,
                    source_item,
                    FacetBody::Location(location.clone()),
                );
                facet.set_instant(timestamp_ms);
                facet.time_updated = now;
                Ok(facet)
            },
        )?;
        stats.upserted.add(FacetKind::Location, 1);
        Ok(())
    }
}
