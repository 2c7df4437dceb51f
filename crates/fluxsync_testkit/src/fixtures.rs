//! Test fixtures.
//!
//! Provides a ready-to-use engine over throwaway stores, so tests only need
//! to supply provider clients.

use fluxsync_core::{
    AttributeStore, Clock, ConnectionId, ConnectionRegistry, Database, Facet, FacetKind,
    FacetQuery, FacetStore, GuestId, ManualClock,
};
use fluxsync_engine::{
    CheckpointKeys, ProviderClient, RetryConfig, StaticProviders, SyncConfig, SyncEngine,
    SyncOutcome, SyncResult,
};
use fluxsync_storage::{BlobStore, FileBlobStore, MemoryBlobStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Wall-clock start of every fixture, in epoch milliseconds.
pub const NOW: i64 = 1_700_000_000_000;

/// An engine over throwaway stores with automatic cleanup.
pub struct TestEnv {
    /// The engine.
    pub engine: Arc<SyncEngine>,
    /// Facet and attribute storage.
    pub db: Arc<Database>,
    /// Blob storage.
    pub blobs: Arc<dyn BlobStore>,
    /// Clock shared by the engine and anything cloned from it.
    pub clock: ManualClock,
    /// Provider clients by connection.
    pub providers: Arc<StaticProviders>,
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates an environment with in-memory stores.
    pub fn memory() -> Self {
        Self::memory_with_config(quick_config())
    }

    /// Creates an in-memory environment with a custom configuration.
    pub fn memory_with_config(config: SyncConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().expect("Failed to open in-memory database"));
        Self::build(config, db, Arc::new(MemoryBlobStore::new()), None)
    }

    /// Creates an environment whose database journal and blobs live in a
    /// temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Arc::new(
            Database::open(&temp_dir.path().join("db")).expect("Failed to open file database"),
        );
        let blobs = Arc::new(FileBlobStore::new(temp_dir.path().join("blobs")));
        Self::build(quick_config(), db, blobs, Some(temp_dir))
    }

    fn build(
        config: SyncConfig,
        db: Arc<Database>,
        blobs: Arc<dyn BlobStore>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let clock = ManualClock::new(NOW);
        let providers = Arc::new(StaticProviders::new());
        let engine = SyncEngine::new(
            config,
            db.clone(),
            blobs.clone(),
            Arc::new(ConnectionRegistry::new()),
            providers.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            engine: Arc::new(engine),
            db,
            blobs,
            clock,
            providers,
            _temp_dir: temp_dir,
        }
    }

    /// Returns the temporary directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(TempDir::path)
    }

    /// Registers an `evernote` connection for guest 1 served by `client`.
    pub fn connect(&self, client: Arc<dyn ProviderClient>) -> ConnectionId {
        self.connect_as(GuestId::new(1), "evernote", client)
    }

    /// Registers a connection for any guest and provider.
    pub fn connect_as(
        &self,
        guest_id: GuestId,
        provider: &str,
        client: Arc<dyn ProviderClient>,
    ) -> ConnectionId {
        let connection = self
            .engine
            .connections()
            .create(guest_id, provider, &self.clock);
        self.providers.register(connection.id, client);
        connection.id
    }

    /// Runs one cycle.
    pub fn sync(&self, connection_id: ConnectionId) -> SyncResult<SyncOutcome> {
        self.engine.sync_connector(connection_id, false)
    }

    /// Runs one cycle and panics unless it committed.
    pub fn sync_committed(&self, connection_id: ConnectionId) -> fluxsync_engine::CycleStats {
        match self.sync(connection_id).expect("sync cycle failed") {
            SyncOutcome::Synced(stats) => stats,
            other => panic!("expected a committed cycle, got {other:?}"),
        }
    }

    /// Reads the stored checkpoint as raw strings: update count, sync time.
    pub fn checkpoint(&self, connection_id: ConnectionId) -> (Option<String>, Option<String>) {
        let connection = self
            .engine
            .connections()
            .get(connection_id)
            .expect("Unknown connection");
        let keys = CheckpointKeys::for_provider(&connection.provider);
        let attributes = self.engine.attributes();
        (
            attributes
                .get(connection_id, &keys.update_count)
                .expect("Failed to read checkpoint"),
            attributes
                .get(connection_id, &keys.sync_time)
                .expect("Failed to read checkpoint"),
        )
    }

    /// Finds one facet by kind and provider id.
    pub fn facet(&self, connection_id: ConnectionId, kind: FacetKind, guid: &str) -> Option<Facet> {
        self.db
            .find_one(connection_id, &FacetQuery::by_id(kind, guid))
            .expect("Failed to query facets")
    }

    /// Counts facets of a connection, optionally of one kind.
    pub fn count(&self, connection_id: ConnectionId, kind: Option<FacetKind>) -> usize {
        self.db
            .count(connection_id, kind)
            .expect("Failed to count facets")
    }

    /// Current fixture time.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

/// Default engine configuration with retries fast enough for tests.
pub fn quick_config() -> SyncConfig {
    SyncConfig::default().with_retry(
        RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false),
    )
}

/// Runs a test with a fresh in-memory environment.
pub fn with_test_env<F, R>(f: F) -> R
where
    F: FnOnce(&TestEnv) -> R,
{
    let env = TestEnv::memory();
    f(&env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_engine::MockProvider;

    #[test]
    fn file_env_keeps_its_directory() {
        let env = TestEnv::file();
        let path = env.path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(env);
        assert!(!path.exists());
    }

    #[test]
    fn connect_registers_client() {
        with_test_env(|env| {
            let id = env.connect(Arc::new(MockProvider::empty(0, NOW)));
            assert_eq!(env.engine.connections().get(id).unwrap().provider, "evernote");
            assert_eq!(env.checkpoint(id), (None, None));
        });
    }
}
