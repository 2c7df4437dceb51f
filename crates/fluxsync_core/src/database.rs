//! Journaled facet and attribute database.

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::facet::Facet;
use crate::journal::{Journal, JournalRecord};
use crate::query::FacetQuery;
use crate::store::{AttributeStore, FacetStore, MergeFn};
use crate::types::{ConnectionId, FacetKind, TimeRange};
use fluxsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// File name of the journal inside a database directory.
pub const JOURNAL_FILE: &str = "facets.journal";

const COMPACT_FILE: &str = "facets.journal.compact";

type FacetKey = (FacetKind, String);

/// The facet and attribute store.
///
/// State lives in memory and every mutation is appended to a journal before
/// it is applied, so reopening the same directory restores the last
/// acknowledged state.
///
/// # Opening a Database
///
/// ```rust
/// use fluxsync_core::{AttributeStore, ConnectionId, Database};
///
/// let db = Database::open_in_memory().unwrap();
/// db.set(ConnectionId::new(1), "evernoteLastUpdateCount", "42").unwrap();
/// assert_eq!(
///     db.get(ConnectionId::new(1), "evernoteLastUpdateCount").unwrap().as_deref(),
///     Some("42")
/// );
/// ```
pub struct Database {
    config: StoreConfig,
    /// Journal path for file-backed databases.
    path: Option<PathBuf>,
    inner: RwLock<Inner>,
}

struct Inner {
    facets: HashMap<ConnectionId, BTreeMap<FacetKey, Facet>>,
    attributes: HashMap<ConnectionId, BTreeMap<String, String>>,
    journal: Journal,
}

/// Size and content statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Connections with at least one facet or attribute.
    pub connections: usize,
    /// Live facets.
    pub facets: usize,
    /// Live attributes.
    pub attributes: usize,
    /// Records in the journal, including superseded ones.
    pub journal_records: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

impl Database {
    /// Opens or creates a database in directory `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the journal
    /// cannot be read, or the journal is corrupted.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        Self::open_with_config(dir, StoreConfig::default())
    }

    /// Opens or creates a database in `dir` with custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the journal
    /// cannot be read, or the journal is corrupted.
    pub fn open_with_config(dir: &Path, config: StoreConfig) -> CoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let stale = dir.join(COMPACT_FILE);
        if stale.exists() {
            tracing::warn!(path = %stale.display(), "removing interrupted compaction output");
            std::fs::remove_file(&stale)?;
        }

        let path = dir.join(JOURNAL_FILE);
        let backend = FileBackend::open(&path)?;
        let mut db = Self::open_with_backend(Box::new(backend), config)?;
        db.path = Some(path);
        Ok(db)
    }

    /// Opens a database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), StoreConfig::default())
    }

    /// Opens a database over an arbitrary journal backend.
    ///
    /// Compaction of such a database rewrites the backend in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or is corrupted.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: StoreConfig,
    ) -> CoreResult<Self> {
        let (journal, records) = Journal::open(backend, config.sync_on_write)?;
        let mut inner = Inner {
            facets: HashMap::new(),
            attributes: HashMap::new(),
            journal,
        };
        let replayed = records.len();
        for record in records {
            inner.apply(record);
        }
        tracing::debug!(
            records = replayed,
            facets = inner.facet_count(),
            "opened facet database"
        );

        Ok(Self {
            config,
            path: None,
            inner: RwLock::new(inner),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Connections that own at least one facet or attribute, ascending.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionId> {
        let inner = self.inner.read();
        let mut ids: Vec<ConnectionId> = inner
            .facets
            .keys()
            .chain(inner.attributes.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Every attribute of a connection, ordered by key.
    #[must_use]
    pub fn attributes(&self, connection_id: ConnectionId) -> Vec<(String, String)> {
        self.inner
            .read()
            .attributes
            .get(&connection_id)
            .map(|attrs| attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns size and content statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal size cannot be read.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        let inner = self.inner.read();
        Ok(DatabaseStats {
            connections: {
                let mut ids: Vec<_> = inner.facets.keys().chain(inner.attributes.keys()).collect();
                ids.sort_unstable();
                ids.dedup();
                ids.len()
            },
            facets: inner.facet_count(),
            attributes: inner.attribute_count(),
            journal_records: inner.journal.record_count(),
            journal_bytes: inner.journal.size()?,
        })
    }

    /// Flushes the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be synced.
    pub fn sync(&self) -> CoreResult<()> {
        self.inner.write().journal.sync()
    }

    /// Rewrites the journal so it holds only live state.
    ///
    /// File-backed databases write a new journal next to the old one and
    /// rename it into place, so a crash mid-compaction leaves the old journal
    /// intact.
    ///
    /// # Errors
    ///
    /// Returns an error if the new journal cannot be written.
    pub fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> CoreResult<()> {
        let before = inner.journal.record_count();
        let records = inner.snapshot();

        match &self.path {
            Some(path) => {
                let tmp = path.with_file_name(COMPACT_FILE);
                let mut backend = FileBackend::open(&tmp)?;
                backend.truncate(0)?;
                let mut buf = Vec::new();
                for record in &records {
                    buf.extend_from_slice(&record.encode()?);
                }
                backend.append(&buf)?;
                backend.sync()?;
                // The handle moves with the file and stays the live journal.
                backend.rename_to(path)?;
                inner
                    .journal
                    .replace_backend(Box::new(backend), records.len() as u64);
            }
            None => inner.journal.rewrite(&records)?,
        }

        tracing::info!(
            before,
            after = records.len(),
            "compacted facet journal"
        );
        Ok(())
    }

    fn commit(&self, inner: &mut Inner, records: Vec<JournalRecord>) -> CoreResult<()> {
        inner.journal.append(&records)?;
        for record in records {
            inner.apply(record);
        }

        let live = (inner.facet_count() + inner.attribute_count()) as u64;
        if self.config.should_compact(inner.journal.record_count(), live) {
            if let Err(e) = self.compact_locked(inner) {
                tracing::warn!(error = %e, "automatic compaction failed");
            }
        }
        Ok(())
    }
}

impl Inner {
    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::PutFacet(facet) => {
                let key = (facet.kind(), facet.provider_id.clone());
                self.facets
                    .entry(facet.connection_id)
                    .or_default()
                    .insert(key, facet);
            }
            JournalRecord::DeleteFacet {
                connection_id,
                kind,
                provider_id,
            } => {
                if let Some(facets) = self.facets.get_mut(&connection_id) {
                    facets.remove(&(kind, provider_id));
                    if facets.is_empty() {
                        self.facets.remove(&connection_id);
                    }
                }
            }
            JournalRecord::EraseConnection(connection_id) => {
                self.facets.remove(&connection_id);
            }
            JournalRecord::SetAttribute {
                connection_id,
                key,
                value,
            } => {
                self.attributes
                    .entry(connection_id)
                    .or_default()
                    .insert(key, value);
            }
            JournalRecord::RemoveAttribute { connection_id, key } => {
                if let Some(attrs) = self.attributes.get_mut(&connection_id) {
                    attrs.remove(&key);
                    if attrs.is_empty() {
                        self.attributes.remove(&connection_id);
                    }
                }
            }
            JournalRecord::RemoveAllAttributes(connection_id) => {
                self.attributes.remove(&connection_id);
            }
        }
    }

    fn matching<'a>(
        &'a self,
        connection_id: ConnectionId,
        query: &'a FacetQuery,
    ) -> impl Iterator<Item = &'a Facet> + 'a {
        self.facets
            .get(&connection_id)
            .into_iter()
            .flat_map(|facets| facets.values())
            .filter(move |facet| query.matches(facet))
    }

    fn facet_count(&self) -> usize {
        self.facets.values().map(BTreeMap::len).sum()
    }

    fn attribute_count(&self) -> usize {
        self.attributes.values().map(BTreeMap::len).sum()
    }

    /// Records that recreate the current state.
    fn snapshot(&self) -> Vec<JournalRecord> {
        let mut connections: Vec<_> = self.facets.keys().chain(self.attributes.keys()).copied().collect();
        connections.sort_unstable();
        connections.dedup();

        let mut records = Vec::with_capacity(self.facet_count() + self.attribute_count());
        for connection_id in connections {
            if let Some(facets) = self.facets.get(&connection_id) {
                records.extend(facets.values().cloned().map(JournalRecord::PutFacet));
            }
            if let Some(attrs) = self.attributes.get(&connection_id) {
                records.extend(attrs.iter().map(|(key, value)| JournalRecord::SetAttribute {
                    connection_id,
                    key: key.clone(),
                    value: value.clone(),
                }));
            }
        }
        records
    }
}

impl FacetStore for Database {
    fn find_one(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<Option<Facet>> {
        let inner = self.inner.read();
        let mut matches = inner.matching(connection_id, query);
        let first = matches.next().cloned();
        let extra = matches.count();
        if extra > 0 {
            return Err(CoreError::AmbiguousQuery {
                connection_id,
                kind: query.target_kind(),
                matches: extra + 1,
            });
        }
        Ok(first)
    }

    fn find_where(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<Vec<Facet>> {
        let inner = self.inner.read();
        Ok(inner.matching(connection_id, query).cloned().collect())
    }

    fn upsert(
        &self,
        connection_id: ConnectionId,
        query: &FacetQuery,
        merge: &mut MergeFn<'_>,
    ) -> CoreResult<Facet> {
        let mut inner = self.inner.write();

        let matches: Vec<&Facet> = inner.matching(connection_id, query).collect();
        if matches.len() > 1 {
            return Err(CoreError::AmbiguousQuery {
                connection_id,
                kind: query.target_kind(),
                matches: matches.len(),
            });
        }
        let current = matches.first().map(|facet| (*facet).clone());
        let previous_key = current
            .as_ref()
            .map(|facet| (facet.kind(), facet.provider_id.clone()));

        let merged = merge(current)?;

        if merged.connection_id != connection_id {
            return Err(CoreError::invalid_merge(format!(
                "facet belongs to connection {}, expected {connection_id}",
                merged.connection_id
            )));
        }
        if merged.kind() != query.target_kind() {
            return Err(CoreError::invalid_merge(format!(
                "facet is a {}, expected a {}",
                merged.kind(),
                query.target_kind()
            )));
        }
        if merged.provider_id.is_empty() {
            return Err(CoreError::invalid_merge("facet has an empty provider id"));
        }
        if let Some(id) = query.provider_id() {
            if merged.provider_id != id {
                return Err(CoreError::invalid_merge(format!(
                    "facet has provider id {:?}, expected {id:?}",
                    merged.provider_id
                )));
            }
        }

        let key = (merged.kind(), merged.provider_id.clone());
        let mut records = Vec::with_capacity(2);
        if previous_key.as_ref() != Some(&key) {
            let taken = inner
                .facets
                .get(&connection_id)
                .is_some_and(|facets| facets.contains_key(&key));
            if taken {
                return Err(CoreError::invalid_merge(format!(
                    "provider id {:?} is already used by another facet",
                    merged.provider_id
                )));
            }
            if let Some((kind, provider_id)) = previous_key {
                records.push(JournalRecord::DeleteFacet {
                    connection_id,
                    kind,
                    provider_id,
                });
            }
        }
        records.push(JournalRecord::PutFacet(merged.clone()));

        self.commit(&mut inner, records)?;
        Ok(merged)
    }

    fn delete_where(&self, connection_id: ConnectionId, query: &FacetQuery) -> CoreResult<usize> {
        let mut inner = self.inner.write();
        let records: Vec<JournalRecord> = inner
            .matching(connection_id, query)
            .map(|facet| JournalRecord::DeleteFacet {
                connection_id,
                kind: facet.kind(),
                provider_id: facet.provider_id.clone(),
            })
            .collect();
        let removed = records.len();
        if removed > 0 {
            self.commit(&mut inner, records)?;
        }
        Ok(removed)
    }

    fn erase_all(&self, connection_id: ConnectionId) -> CoreResult<usize> {
        let mut inner = self.inner.write();
        let removed = inner.facets.get(&connection_id).map_or(0, BTreeMap::len);
        if removed > 0 {
            self.commit(&mut inner, vec![JournalRecord::EraseConnection(connection_id)])?;
        }
        Ok(removed)
    }

    fn find_in_range(
        &self,
        connection_id: ConnectionId,
        kind: FacetKind,
        range: TimeRange,
    ) -> CoreResult<Vec<Facet>> {
        let inner = self.inner.read();
        let mut found: Vec<Facet> = inner
            .facets
            .get(&connection_id)
            .into_iter()
            .flat_map(|facets| facets.values())
            .filter(|facet| facet.kind() == kind)
            .filter(|facet| match facet.start {
                Some(start) => range.overlaps(start, facet.end.unwrap_or(start)),
                None => false,
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.provider_id.cmp(&b.provider_id)));
        Ok(found)
    }

    fn count(&self, connection_id: ConnectionId, kind: Option<FacetKind>) -> CoreResult<usize> {
        let inner = self.inner.read();
        let Some(facets) = inner.facets.get(&connection_id) else {
            return Ok(0);
        };
        Ok(match kind {
            Some(kind) => facets.keys().filter(|(k, _)| *k == kind).count(),
            None => facets.len(),
        })
    }
}

impl AttributeStore for Database {
    fn get(&self, connection_id: ConnectionId, key: &str) -> CoreResult<Option<String>> {
        Ok(self
            .inner
            .read()
            .attributes
            .get(&connection_id)
            .and_then(|attrs| attrs.get(key))
            .cloned())
    }

    fn set(&self, connection_id: ConnectionId, key: &str, value: &str) -> CoreResult<()> {
        let mut inner = self.inner.write();
        self.commit(
            &mut inner,
            vec![JournalRecord::SetAttribute {
                connection_id,
                key: key.to_string(),
                value: value.to_string(),
            }],
        )
    }

    fn remove(&self, connection_id: ConnectionId, key: &str) -> CoreResult<bool> {
        let mut inner = self.inner.write();
        let exists = inner
            .attributes
            .get(&connection_id)
            .is_some_and(|attrs| attrs.contains_key(key));
        if exists {
            self.commit(
                &mut inner,
                vec![JournalRecord::RemoveAttribute {
                    connection_id,
                    key: key.to_string(),
                }],
            )?;
        }
        Ok(exists)
    }

    fn remove_all(&self, connection_id: ConnectionId) -> CoreResult<usize> {
        let mut inner = self.inner.write();
        let removed = inner.attributes.get(&connection_id).map_or(0, BTreeMap::len);
        if removed > 0 {
            self.commit(&mut inner, vec![JournalRecord::RemoveAllAttributes(connection_id)])?;
        }
        Ok(removed)
    }
}
