//! The per-connection sync cycle.
//!
//! One cycle brings a connection's facets up to date with its provider:
//!
//! 1. Load the checkpoint (update count and sync time)
//! 2. Query the feed state; erase everything if the provider invalidated the
//!    checkpoint, or stop early if nothing changed
//! 3. Pull pages from the checkpoint until the feed is exhausted
//! 4. Reconcile tags, notebooks, notes (re-fetched in full) and resources
//! 5. Process expunges (incremental cycles only)
//! 6. Commit the new checkpoint
//!
//! The checkpoint write is the commit point. A cycle that fails or is
//! cancelled before it leaves the checkpoint alone, and re-running it
//! converges because every write is an idempotent upsert or delete.

use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::expunge::Remover;
use crate::provider::{ProviderClient, ProviderFactory};
use crate::reconcile::{ChangeSet, Reconciler};
use crate::stats::{CycleStats, EngineStats, KindCounts};
use fluxsync_core::{
    AttributeStore, Clock, Connection, ConnectionId, ConnectionRegistry, ConnectionStatus,
    FacetKind, FacetStore,
};
use fluxsync_protocol::PageRequest;
use fluxsync_storage::BlobStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Attribute keys holding a connection's checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKeys {
    /// Key of the last committed update count.
    pub update_count: String,
    /// Key of the last committed server time.
    pub sync_time: String,
}

impl CheckpointKeys {
    /// Keys for a provider, e.g. `evernoteLastUpdateCount`.
    pub fn for_provider(provider: &str) -> Self {
        Self {
            update_count: format!("{provider}LastUpdateCount"),
            sync_time: format!("{provider}LastSyncTime"),
        }
    }
}

/// A connection's committed cursor. Either part may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    /// Highest USN the connection has fully synced.
    pub update_count: Option<i32>,
    /// Server time of the last committed cycle.
    pub sync_time: Option<i64>,
}

/// Outcome of a sync attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Nothing changed since the last checkpoint.
    NoOp,
    /// The cycle completed and committed a checkpoint.
    Synced(CycleStats),
    /// The provider rate limited us; do not retry before `until` (epoch ms).
    RateLimited {
        /// Resume-not-before time.
        until: i64,
    },
    /// The connection's credentials need to be renewed by the user.
    AuthExpired,
    /// A cycle for the connection was already running; this one was dropped.
    Busy,
}

/// What a connection's cycle is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle has run.
    Idle,
    /// Querying the feed state.
    FetchingState,
    /// Pulling change pages.
    Pulling,
    /// Writing upserts.
    Reconciling,
    /// Processing expunges.
    Expunging,
    /// Writing the checkpoint.
    Committing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
    /// Waiting before a retry.
    RetryWait,
}

impl CyclePhase {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CyclePhase::FetchingState
                | CyclePhase::Pulling
                | CyclePhase::Reconciling
                | CyclePhase::Expunging
                | CyclePhase::Committing
        )
    }
}

/// Cooperative cancellation flag for one cycle.
///
/// Checked between pages and between batches; a cancelled cycle returns
/// [`SyncError::Cancelled`] and never commits a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs sync cycles for the connections of a [`ConnectionRegistry`].
pub struct SyncEngine {
    config: SyncConfig,
    facets: Arc<dyn FacetStore>,
    attributes: Arc<dyn AttributeStore>,
    blobs: Arc<dyn BlobStore>,
    connections: Arc<ConnectionRegistry>,
    providers: Arc<dyn ProviderFactory>,
    clock: Arc<dyn Clock>,
    phases: RwLock<HashMap<ConnectionId, CyclePhase>>,
    stats: RwLock<EngineStats>,
}

/// Clears the connection's busy flag when the cycle ends, however it ends.
struct SyncGuard<'a> {
    connections: &'a ConnectionRegistry,
    connection_id: ConnectionId,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.connections.end_sync(self.connection_id);
    }
}

impl SyncEngine {
    /// Creates an engine over a store implementing both the facet and the
    /// attribute contracts, such as [`fluxsync_core::Database`].
    pub fn new<S>(
        config: SyncConfig,
        store: Arc<S>,
        blobs: Arc<dyn BlobStore>,
        connections: Arc<ConnectionRegistry>,
        providers: Arc<dyn ProviderFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        S: FacetStore + AttributeStore + 'static,
    {
        Self {
            config,
            facets: store.clone(),
            attributes: store,
            blobs,
            connections,
            providers,
            clock,
            phases: RwLock::new(HashMap::new()),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the connection registry.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Returns the facet store.
    pub fn facets(&self) -> &Arc<dyn FacetStore> {
        &self.facets
    }

    /// Returns the attribute store.
    pub fn attributes(&self) -> &Arc<dyn AttributeStore> {
        &self.attributes
    }

    /// Returns the blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Returns the clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Gets the phase of a connection's current or last cycle.
    pub fn phase(&self, connection_id: ConnectionId) -> CyclePhase {
        self.phases
            .read()
            .get(&connection_id)
            .copied()
            .unwrap_or(CyclePhase::Idle)
    }

    fn set_phase(&self, connection_id: ConnectionId, phase: CyclePhase) {
        self.phases.write().insert(connection_id, phase);
    }

    /// Reads a connection's checkpoint. Unparseable values count as missing.
    pub fn checkpoint(&self, connection: &Connection) -> SyncResult<Checkpoint> {
        let keys = CheckpointKeys::for_provider(&connection.provider);
        Ok(Checkpoint {
            update_count: self.parse_attribute(connection.id, &keys.update_count)?,
            sync_time: self.parse_attribute(connection.id, &keys.sync_time)?,
        })
    }

    fn parse_attribute<T: std::str::FromStr>(
        &self,
        connection_id: ConnectionId,
        key: &str,
    ) -> SyncResult<Option<T>> {
        let Some(raw) = self.attributes.get(connection_id, key)? else {
            return Ok(None);
        };
        match raw.trim().parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!(%connection_id, key, value = %raw, "ignoring unparseable checkpoint value");
                Ok(None)
            }
        }
    }

    /// Cancellation points also stop a cycle whose connection was removed.
    fn check_cancelled(&self, connection_id: ConnectionId, cancel: &CancelToken) -> SyncResult<()> {
        if cancel.is_cancelled() || self.connections.get(connection_id).is_none() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs one sync cycle for a connection.
    pub fn sync_connector(
        &self,
        connection_id: ConnectionId,
        force_full_sync: bool,
    ) -> SyncResult<SyncOutcome> {
        self.sync_connector_with_cancel(connection_id, force_full_sync, &CancelToken::new())
    }

    /// Runs one sync cycle for a connection, stopping early if `cancel` is
    /// triggered.
    ///
    /// Rate limits and expired credentials are reported as outcomes, after
    /// recording them on the connection. A connection that is rate limited
    /// or awaiting re-authorization is not contacted at all.
    ///
    /// # Errors
    ///
    /// Any other failure aborts the cycle without committing a checkpoint
    /// and marks the connection as failed.
    #[tracing::instrument(skip(self, cancel), fields(connection_id = %connection_id))]
    pub fn sync_connector_with_cancel(
        &self,
        connection_id: ConnectionId,
        force_full_sync: bool,
        cancel: &CancelToken,
    ) -> SyncResult<SyncOutcome> {
        let connection = self
            .connections
            .get(connection_id)
            .ok_or(SyncError::UnknownConnection(connection_id))?;

        if connection.status == ConnectionStatus::AuthExpired {
            debug!("connection awaits re-authorization");
            return Ok(SyncOutcome::AuthExpired);
        }
        if let ConnectionStatus::RateLimited { until } = connection.status {
            if self.clock.now_millis() < until {
                debug!(until, "connection is rate limited");
                return Ok(SyncOutcome::RateLimited { until });
            }
        }

        if !self.connections.try_begin_sync(connection_id)? {
            info!("cycle already running, trigger dropped");
            self.stats.write().busy += 1;
            return Ok(SyncOutcome::Busy);
        }
        let _guard = SyncGuard {
            connections: &self.connections,
            connection_id,
        };

        let start = Instant::now();
        let result = self
            .providers
            .client_for(&connection, self.attributes.as_ref())
            .and_then(|client| {
                self.run_cycle(&connection, client.as_ref(), force_full_sync, cancel)
            });
        if self.connections.get(connection_id).is_none() {
            return self.discard_removed(connection_id);
        }
        self.finish(connection_id, result, start)
    }

    /// Erases whatever a cycle wrote for a connection that was removed
    /// while the cycle ran. The cycle has stopped writing by now, so nothing
    /// it did can outlive the removal.
    fn discard_removed(&self, connection_id: ConnectionId) -> SyncResult<SyncOutcome> {
        self.set_phase(connection_id, CyclePhase::Idle);
        let blobs = self.blobs.delete_connection(connection_id.as_u64())?;
        let facets = self.facets.erase_all(connection_id)?;
        let attributes = self.attributes.remove_all(connection_id)?;
        info!(facets, attributes, blobs, "connection removed during its cycle, writes discarded");
        Err(SyncError::Cancelled)
    }

    /// Runs a cycle, retrying transient provider failures with backoff.
    ///
    /// Rate limits, expired credentials and storage failures are never
    /// retried here.
    pub fn sync_with_retry(
        &self,
        connection_id: ConnectionId,
        force_full_sync: bool,
    ) -> SyncResult<SyncOutcome> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_phase(connection_id, CyclePhase::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                debug!(%connection_id, attempt, ?delay, "retrying sync");
                std::thread::sleep(delay);

                self.stats.write().retries += 1;
            }

            match self.sync_connector(connection_id, force_full_sync) {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        warn!(%connection_id, attempt, error = %e, "transient failure");
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::transient("no sync attempts made")))
    }

    fn finish(
        &self,
        connection_id: ConnectionId,
        result: SyncResult<Option<CycleStats>>,
        start: Instant,
    ) -> SyncResult<SyncOutcome> {
        match result {
            Ok(None) => {
                self.set_phase(connection_id, CyclePhase::Synced);
                self.update_status(connection_id, ConnectionStatus::Up);
                self.stats.write().no_ops += 1;
                Ok(SyncOutcome::NoOp)
            }
            Ok(Some(mut cycle)) => {
                cycle.duration = start.elapsed();
                self.set_phase(connection_id, CyclePhase::Synced);
                self.update_status(connection_id, ConnectionStatus::Up);
                self.stats.write().record_cycle(&cycle);
                info!(
                    pages = cycle.pages,
                    upserted = cycle.upserted.total(),
                    expunged = cycle.expunged.total(),
                    skipped = cycle.skipped,
                    update_count = cycle.update_count,
                    duration_ms = cycle.duration.as_millis() as u64,
                    "sync cycle committed"
                );
                Ok(SyncOutcome::Synced(cycle))
            }
            Err(SyncError::RateLimited { retry_after }) => {
                let wait = i64::try_from(retry_after.as_millis()).unwrap_or(i64::MAX);
                let until = self.clock.now_millis().saturating_add(wait);
                warn!(until, ?retry_after, "rate limited by provider");
                self.set_phase(connection_id, CyclePhase::Error);
                self.update_status(connection_id, ConnectionStatus::RateLimited { until });
                if let Err(e) = self
                    .connections
                    .set_resume_not_before(connection_id, Some(until))
                {
                    debug!(error = %e, "connection gone before resume time was recorded");
                }
                self.stats.write().rate_limited += 1;
                Ok(SyncOutcome::RateLimited { until })
            }
            Err(SyncError::AuthExpired(reason)) => {
                warn!(%reason, "authorization expired");
                self.set_phase(connection_id, CyclePhase::Error);
                self.update_status(connection_id, ConnectionStatus::AuthExpired);
                self.stats.write().auth_expired += 1;
                Ok(SyncOutcome::AuthExpired)
            }
            Err(SyncError::Cancelled) => {
                info!("sync cycle cancelled");
                self.set_phase(connection_id, CyclePhase::Idle);
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                error!(error = %e, kind = ?e.kind(), "sync cycle failed");
                self.set_phase(connection_id, CyclePhase::Error);
                self.update_status(
                    connection_id,
                    ConnectionStatus::Failed {
                        reason: e.to_string(),
                    },
                );
                let mut stats = self.stats.write();
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn update_status(&self, connection_id: ConnectionId, status: ConnectionStatus) {
        if let Err(e) = self.connections.set_status(connection_id, status) {
            debug!(%connection_id, error = %e, "connection gone before status was recorded");
        }
    }

    /// The cycle proper. `Ok(None)` means nothing changed.
    fn run_cycle(
        &self,
        connection: &Connection,
        client: &dyn ProviderClient,
        force_full_sync: bool,
        cancel: &CancelToken,
    ) -> SyncResult<Option<CycleStats>> {
        let id = connection.id;
        let keys = CheckpointKeys::for_provider(&connection.provider);
        let checkpoint = self.checkpoint(connection)?;
        let mut stats = CycleStats::default();
        let mut full_sync = force_full_sync || checkpoint.update_count.is_none();

        self.check_cancelled(id, cancel)?;
        self.set_phase(id, CyclePhase::FetchingState);
        let state = client.feed_state()?;
        debug!(
            update_count = state.update_count,
            full_sync_before = state.full_sync_before,
            last_update_count = ?checkpoint.update_count,
            "feed state"
        );

        if let Some(last_sync_time) = checkpoint.sync_time {
            if state.full_sync_before > last_sync_time {
                info!(
                    full_sync_before = state.full_sync_before,
                    last_sync_time, "provider invalidated the checkpoint, erasing local data"
                );
                self.erase_connection_data(id, &keys)?;
                stats.full_resync = true;
                full_sync = true;
            }
        }

        if !full_sync && checkpoint.update_count == Some(state.update_count) {
            debug!("no changes since last sync");
            return Ok(None);
        }
        stats.full_sync = full_sync;

        self.set_phase(id, CyclePhase::Pulling);
        let mut after_usn = if full_sync {
            0
        } else {
            checkpoint.update_count.unwrap_or(0)
        };
        let mut chunks = Vec::new();
        loop {
            self.check_cancelled(id, cancel)?;
            let request = PageRequest::new(after_usn, self.config.page_size, full_sync);
            let chunk = client.sync_chunk(&request)?;
            stats.pages += 1;
            debug!(
                after_usn,
                chunk_high_usn = ?chunk.chunk_high_usn,
                update_count = chunk.update_count,
                entries = chunk.len(),
                "fetched page"
            );

            let last = chunk.is_last();
            let high = chunk.chunk_high_usn;
            chunks.push(chunk);
            if last {
                break;
            }
            match high {
                Some(high) if high > after_usn => after_usn = high,
                _ => return Err(SyncError::FeedStalled { after_usn }),
            }
        }

        let changes = ChangeSet::from_chunks(&chunks);
        stats.skipped += changes.malformed;
        self.reconcile(connection, client, &changes, &mut stats, cancel)?;
        self.expunge(id, &changes, full_sync, &mut stats, cancel)?;

        self.check_cancelled(id, cancel)?;
        self.set_phase(id, CyclePhase::Committing);
        let (update_count, sync_time) = match chunks.last() {
            Some(last) if last.current_time > 0 => (last.update_count, last.current_time),
            Some(last) => (last.update_count, state.current_time),
            None => (state.update_count, state.current_time),
        };
        // The update count goes last: it is what makes the cycle committed.
        self.attributes
            .set(id, &keys.sync_time, &sync_time.to_string())?;
        self.attributes
            .set(id, &keys.update_count, &update_count.to_string())?;
        stats.update_count = update_count;
        stats.sync_time = sync_time;

        Ok(Some(stats))
    }

    fn reconcile(
        &self,
        connection: &Connection,
        client: &dyn ProviderClient,
        changes: &ChangeSet,
        stats: &mut CycleStats,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        let id = connection.id;
        self.set_phase(id, CyclePhase::Reconciling);
        let reconciler = Reconciler::new(
            id,
            &connection.provider,
            self.facets.as_ref(),
            self.blobs.as_ref(),
            self.clock.now_millis(),
        );

        self.check_cancelled(id, cancel)?;
        for (guid, tag) in &changes.tags {
            reconciler.tag(guid, tag, stats)?;
        }

        self.check_cancelled(id, cancel)?;
        for (guid, notebook) in &changes.notebooks {
            reconciler.notebook(guid, notebook, stats)?;
        }

        self.check_cancelled(id, cancel)?;
        for guid in changes.notes.keys() {
            let note = match client.note(guid) {
                Ok(note) => note,
                Err(e) if e.kind() == ErrorKind::DataIntegrity => {
                    warn!(note = %guid, error = %e, "skipping malformed note");
                    stats.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            // Stop before writing if cancelled or removed during the fetch.
            self.check_cancelled(id, cancel)?;
            reconciler.note(guid, &note, stats)?;
        }

        self.check_cancelled(id, cancel)?;
        for (guid, resource) in &changes.resources {
            reconciler.resource(guid, resource, stats)?;
        }
        Ok(())
    }

    fn expunge(
        &self,
        id: ConnectionId,
        changes: &ChangeSet,
        full_sync: bool,
        stats: &mut CycleStats,
        cancel: &CancelToken,
    ) -> SyncResult<()> {
        self.set_phase(id, CyclePhase::Expunging);
        let remover = Remover::new(id, self.facets.as_ref(), self.blobs.as_ref());

        if full_sync {
            // Full syncs carry no expunge lists worth acting on, but an id
            // reported both ways in this cycle must still end up deleted.
            self.check_cancelled(id, cancel)?;
            for kind in [FacetKind::Note, FacetKind::Notebook, FacetKind::Tag] {
                for (_, guid) in changes.contested.iter().filter(|(k, _)| *k == kind) {
                    remove(&remover, kind, guid, stats)?;
                }
            }
            return Ok(());
        }

        self.check_cancelled(id, cancel)?;
        for guid in &changes.expunged_notes {
            remover.remove_leaf(guid, stats)?;
        }
        self.check_cancelled(id, cancel)?;
        for guid in &changes.expunged_notebooks {
            remover.remove_container(guid, stats)?;
        }
        self.check_cancelled(id, cancel)?;
        for guid in &changes.expunged_tags {
            remover.remove_tag(guid, stats)?;
        }
        Ok(())
    }

    fn erase_connection_data(&self, id: ConnectionId, keys: &CheckpointKeys) -> SyncResult<()> {
        let facets = self.facets.erase_all(id)?;
        let blobs = self.blobs.delete_connection(id.as_u64())?;
        self.attributes.remove(id, &keys.update_count)?;
        self.attributes.remove(id, &keys.sync_time)?;
        info!(connection_id = %id, facets, blobs, "erased connection data");
        Ok(())
    }

    /// Removes a note with its resources, their blobs and derived locations.
    /// Removing a note that is not stored does nothing.
    pub fn remove_leaf(&self, connection_id: ConnectionId, guid: &str) -> SyncResult<KindCounts> {
        let mut stats = CycleStats::default();
        Remover::new(connection_id, self.facets.as_ref(), self.blobs.as_ref())
            .remove_leaf(guid, &mut stats)?;
        Ok(stats.expunged)
    }

    /// Removes a notebook and every note filed in it.
    /// Removing a notebook that is not stored does nothing.
    pub fn remove_container(
        &self,
        connection_id: ConnectionId,
        guid: &str,
    ) -> SyncResult<KindCounts> {
        let mut stats = CycleStats::default();
        Remover::new(connection_id, self.facets.as_ref(), self.blobs.as_ref())
            .remove_container(guid, &mut stats)?;
        Ok(stats.expunged)
    }
}

fn remove(
    remover: &Remover<'_>,
    kind: FacetKind,
    guid: &str,
    stats: &mut CycleStats,
) -> SyncResult<()> {
    match kind {
        FacetKind::Note => remover.remove_leaf(guid, stats),
        FacetKind::Notebook => remover.remove_container(guid, stats),
        FacetKind::Tag => remover.remove_tag(guid, stats),
        FacetKind::Resource | FacetKind::Location => Ok(()),
    }
}
