//! Removal of expunged items and everything that depends on them.
//!
//! Every removal is idempotent: removing something that is already gone is
//! a no-op. Dependents are found through their parent reference, not through
//! the parent record, so an interrupted removal can be run again.

use crate::error::SyncResult;
use crate::stats::CycleStats;
use fluxsync_core::{ConnectionId, FacetKind, FacetQuery, FacetStore};
use fluxsync_storage::{BlobKey, BlobRole, BlobStore};
use tracing::debug;

pub(crate) struct Remover<'a> {
    connection_id: ConnectionId,
    facets: &'a dyn FacetStore,
    blobs: &'a dyn BlobStore,
}

impl<'a> Remover<'a> {
    pub fn new(
        connection_id: ConnectionId,
        facets: &'a dyn FacetStore,
        blobs: &'a dyn BlobStore,
    ) -> Self {
        Self {
            connection_id,
            facets,
            blobs,
        }
    }

    fn delete(&self, kind: FacetKind, guid: &str, stats: &mut CycleStats) -> SyncResult<()> {
        let removed = self
            .facets
            .delete_where(self.connection_id, &FacetQuery::by_id(kind, guid))?;
        stats.expunged.add(kind, removed);
        Ok(())
    }

    /// Removes a note, its resources with their blobs, and the locations
    /// derived from any of them.
    pub fn remove_leaf(&self, guid: &str, stats: &mut CycleStats) -> SyncResult<()> {
        debug!(connection_id = %self.connection_id, note = guid, "removing note");
        self.delete(FacetKind::Note, guid, stats)?;

        let resources = self.facets.find_where(
            self.connection_id,
            &FacetQuery::kind(FacetKind::Resource).with_parent(guid),
        )?;
        for resource in resources {
            self.remove_resource(&resource.provider_id, stats)?;
        }

        self.delete(FacetKind::Location, guid, stats)
    }

    /// Removes a notebook and every note filed in it.
    pub fn remove_container(&self, guid: &str, stats: &mut CycleStats) -> SyncResult<()> {
        debug!(connection_id = %self.connection_id, notebook = guid, "removing notebook");
        self.delete(FacetKind::Notebook, guid, stats)?;

        let notes = self.facets.find_where(
            self.connection_id,
            &FacetQuery::kind(FacetKind::Note).with_parent(guid),
        )?;
        for note in notes {
            self.remove_leaf(&note.provider_id, stats)?;
        }
        Ok(())
    }

    /// Removes a tag.
    pub fn remove_tag(&self, guid: &str, stats: &mut CycleStats) -> SyncResult<()> {
        self.delete(FacetKind::Tag, guid, stats)
    }

    fn remove_resource(&self, guid: &str, stats: &mut CycleStats) -> SyncResult<()> {
        // Bodies first: the facet is how a rerun finds them.
        for role in BlobRole::ALL {
            let key = BlobKey::new(self.connection_id.as_u64(), guid, role);
            if self.blobs.delete(&key)? {
                stats.blobs_deleted += 1;
            }
        }
        self.delete(FacetKind::Resource, guid, stats)?;
        self.delete(FacetKind::Location, guid, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::Reconciler;
    use fluxsync_core::Database;
    use fluxsync_protocol::{DataBody, NotePayload, NotebookPayload, ResourcePayload};
    use fluxsync_storage::MemoryBlobStore;

    const CONN: ConnectionId = ConnectionId::new(3);

    fn note(guid: &str, notebook: &str, resource: &str) -> NotePayload {
        NotePayload {
            guid: Some(guid.into()),
            notebook_guid: Some(notebook.into()),
            resources: Some(vec![ResourcePayload {
                guid: Some(resource.into()),
                note_guid: Some(guid.into()),
                mime: Some("application/pdf".into()),
                data: Some(DataBody {
                    body: Some(b"%PDF".to_vec()),
                    ..DataBody::default()
                }),
                alternate_data: Some(DataBody {
                    body: Some(b"alt".to_vec()),
                    ..DataBody::default()
                }),
                ..ResourcePayload::default()
            }]),
            ..NotePayload::default()
        }
    }

    fn seed(db: &Database, blobs: &MemoryBlobStore) {
        let reconciler = Reconciler::new(CONN, "evernote", db, blobs, 0);
        let mut stats = CycleStats::default();
        reconciler
            .notebook("b1", &NotebookPayload::default(), &mut stats)
            .unwrap();
        reconciler
            .notebook("b2", &NotebookPayload::default(), &mut stats)
            .unwrap();
        reconciler.note("n1", &note("n1", "b1", "r1"), &mut stats).unwrap();
        reconciler.note("n2", &note("n2", "b1", "r2"), &mut stats).unwrap();
        reconciler.note("n3", &note("n3", "b2", "r3"), &mut stats).unwrap();
    }

    #[test]
    fn remove_leaf_takes_resources_and_blobs() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        seed(&db, &blobs);
        assert_eq!(blobs.len(), 6);

        let remover = Remover::new(CONN, &db, &blobs);
        let mut stats = CycleStats::default();
        remover.remove_leaf("n1", &mut stats).unwrap();

        assert_eq!(stats.expunged.notes, 1);
        assert_eq!(stats.expunged.resources, 1);
        assert_eq!(stats.blobs_deleted, 2);
        assert_eq!(blobs.len(), 4);
        assert!(db
            .find_one(CONN, &FacetQuery::by_id(FacetKind::Resource, "r1"))
            .unwrap()
            .is_none());

        // Again: nothing left to do.
        let mut again = CycleStats::default();
        remover.remove_leaf("n1", &mut again).unwrap();
        assert_eq!(again.expunged.total(), 0);
        assert_eq!(again.blobs_deleted, 0);
    }

    #[test]
    fn remove_container_cascades() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        seed(&db, &blobs);

        let remover = Remover::new(CONN, &db, &blobs);
        let mut stats = CycleStats::default();
        remover.remove_container("b1", &mut stats).unwrap();

        assert_eq!(stats.expunged.notebooks, 1);
        assert_eq!(stats.expunged.notes, 2);
        assert_eq!(stats.expunged.resources, 2);
        assert_eq!(db.count(CONN, Some(FacetKind::Note)).unwrap(), 1);
        assert_eq!(db.count(CONN, Some(FacetKind::Notebook)).unwrap(), 1);
        assert_eq!(blobs.keys_for(3).len(), 2);

        let mut again = CycleStats::default();
        remover.remove_container("b1", &mut again).unwrap();
        assert_eq!(again.expunged.total(), 0);
    }

    #[test]
    fn removing_unknown_ids_is_a_no_op() {
        let db = Database::open_in_memory().unwrap();
        let blobs = MemoryBlobStore::new();
        let remover = Remover::new(CONN, &db, &blobs);
        let mut stats = CycleStats::default();

        remover.remove_leaf("nope", &mut stats).unwrap();
        remover.remove_container("nope", &mut stats).unwrap();
        remover.remove_tag("nope", &mut stats).unwrap();
        assert_eq!(stats.expunged.total(), 0);
        assert_eq!(db.stats().unwrap().journal_records, 0);
    }
}
