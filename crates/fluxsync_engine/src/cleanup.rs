//! Background erasure of removed connections.
//!
//! Removing a connection unregisters it at once; its facets, attributes and
//! blobs are erased later by a pool of workers draining a bounded channel.
//! Jobs are delivered at least once and erasing an already empty connection
//! does nothing, so a job may be retried or enqueued twice.

use crate::config::CleanupConfig;
use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use fluxsync_core::{
    AttributeStore, Connection, ConnectionId, ConnectionRegistry, FacetStore, GuestId,
};
use fluxsync_storage::BlobStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What erasing one connection removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErasedCounts {
    /// Facets removed.
    pub facets: usize,
    /// Attributes removed, checkpoints included.
    pub attributes: usize,
    /// Blob bodies removed.
    pub blobs: usize,
}

/// Totals over the lifetime of a [`CleanupQueue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Jobs accepted.
    pub enqueued: u64,
    /// Jobs that finished.
    pub completed: u64,
    /// Jobs that failed every attempt.
    pub failed: u64,
    /// Attempts that failed and were retried.
    pub retries: u64,
    /// Sum of everything erased.
    pub erased: ErasedCounts,
    /// Connections whose job failed for good.
    pub failed_connections: Vec<ConnectionId>,
}

#[derive(Clone)]
struct Eraser {
    facets: Arc<dyn FacetStore>,
    attributes: Arc<dyn AttributeStore>,
    blobs: Arc<dyn BlobStore>,
}

impl Eraser {
    fn erase(&self, connection_id: ConnectionId) -> SyncResult<ErasedCounts> {
        let blobs = self.blobs.delete_connection(connection_id.as_u64())?;
        let facets = self.facets.erase_all(connection_id)?;
        let attributes = self.attributes.remove_all(connection_id)?;
        Ok(ErasedCounts {
            facets,
            attributes,
            blobs,
        })
    }
}

/// Worker pool erasing removed connections.
pub struct CleanupQueue {
    sender: Option<mpsc::Sender<ConnectionId>>,
    workers: Vec<JoinHandle<()>>,
    report: Arc<Mutex<CleanupReport>>,
}

impl CleanupQueue {
    /// Starts the workers. Must be called from within a tokio runtime.
    pub fn start(
        config: CleanupConfig,
        facets: Arc<dyn FacetStore>,
        attributes: Arc<dyn AttributeStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_depth.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let report = Arc::new(Mutex::new(CleanupReport::default()));
        let eraser = Eraser {
            facets,
            attributes,
            blobs,
        };

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    config.clone(),
                    eraser.clone(),
                    receiver.clone(),
                    report.clone(),
                ))
            })
            .collect();
        info!(workers = config.workers, queue_depth = config.queue_depth, "cleanup queue started");

        Self {
            sender: Some(sender),
            workers,
            report,
        }
    }

    /// Starts workers over the stores of an engine.
    pub fn for_engine(config: CleanupConfig, engine: &SyncEngine) -> Self {
        Self::start(
            config,
            engine.facets().clone(),
            engine.attributes().clone(),
            engine.blobs().clone(),
        )
    }

    fn sender(&self) -> SyncResult<&mpsc::Sender<ConnectionId>> {
        self.sender.as_ref().ok_or(SyncError::QueueClosed)
    }

    /// Enqueues erasure of a connection, waiting for room in the queue.
    pub async fn enqueue(&self, connection_id: ConnectionId) -> SyncResult<()> {
        self.sender()?
            .send(connection_id)
            .await
            .map_err(|_| SyncError::QueueClosed)?;
        self.report.lock().enqueued += 1;
        debug!(%connection_id, "cleanup enqueued");
        Ok(())
    }

    /// Enqueues erasure of a connection without waiting.
    /// Returns false if the queue is full.
    pub fn try_enqueue(&self, connection_id: ConnectionId) -> SyncResult<bool> {
        match self.sender()?.try_send(connection_id) {
            Ok(()) => {
                self.report.lock().enqueued += 1;
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::QueueClosed),
        }
    }

    /// Unregisters a connection and enqueues erasure of its data.
    ///
    /// A cycle still running for the connection stops at its next
    /// cancellation point and erases whatever it wrote.
    pub async fn remove_connection(
        &self,
        connections: &ConnectionRegistry,
        connection_id: ConnectionId,
    ) -> SyncResult<Connection> {
        let removed = connections.remove(connection_id)?;
        self.enqueue(connection_id).await?;
        Ok(removed)
    }

    /// Unregisters every connection of a guest and enqueues erasure of each.
    pub async fn remove_guest(
        &self,
        connections: &ConnectionRegistry,
        guest_id: GuestId,
    ) -> SyncResult<Vec<Connection>> {
        let removed = connections.remove_guest(guest_id);
        for connection in &removed {
            self.enqueue(connection.id).await?;
        }
        info!(%guest_id, connections = removed.len(), "guest connections removed");
        Ok(removed)
    }

    /// Returns the totals so far.
    pub fn report(&self) -> CleanupReport {
        self.report.lock().clone()
    }

    /// Stops accepting jobs, drains the queue and waits for the workers.
    pub async fn shutdown(mut self) -> CleanupReport {
        self.sender = None;
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!(error = %e, "cleanup worker panicked");
            }
        }
        let report = self.report();
        info!(
            completed = report.completed,
            failed = report.failed,
            "cleanup queue stopped"
        );
        report
    }
}

async fn run_worker(
    worker: usize,
    config: CleanupConfig,
    eraser: Eraser,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ConnectionId>>>,
    report: Arc<Mutex<CleanupReport>>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(connection_id) = job else {
            debug!(worker, "cleanup worker exiting");
            return;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let job_eraser = eraser.clone();
            let result = tokio::task::spawn_blocking(move || job_eraser.erase(connection_id))
                .await
                .unwrap_or_else(|e| Err(SyncError::transient(format!("cleanup task failed: {e}"))));

            match result {
                Ok(erased) => {
                    info!(
                        worker,
                        %connection_id,
                        facets = erased.facets,
                        attributes = erased.attributes,
                        blobs = erased.blobs,
                        "connection erased"
                    );
                    let mut report = report.lock();
                    report.completed += 1;
                    report.erased.facets += erased.facets;
                    report.erased.attributes += erased.attributes;
                    report.erased.blobs += erased.blobs;
                    break;
                }
                Err(e) if attempt < config.max_attempts => {
                    warn!(worker, %connection_id, attempt, error = %e, "cleanup failed, retrying");
                    report.lock().retries += 1;
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(e) => {
                    error!(worker, %connection_id, attempt, error = %e, "cleanup failed");
                    let mut report = report.lock();
                    report.failed += 1;
                    report.failed_connections.push(connection_id);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxsync_core::{Database, Facet, FacetBody, FacetKind, FacetQuery, ManualClock, TagFacet};
    use fluxsync_storage::{BlobKey, BlobRole, MemoryBlobStore, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn seed(db: &Database, blobs: &MemoryBlobStore, connection_id: ConnectionId) {
        db.upsert(
            connection_id,
            &FacetQuery::by_id(FacetKind::Tag, "t1"),
            &mut |_stored: Option<Facet>| {
                Ok(Facet::new(
                    connection_id,
                    "t1",
                    FacetBody::Tag(TagFacet::default()),
                ))
            },
        )
        .unwrap();
        db.set(connection_id, "evernoteLastUpdateCount", "7").unwrap();
        blobs
            .write(
                &BlobKey::new(connection_id.as_u64(), "r1", BlobRole::Main),
                b"body",
                Some("image/png"),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn removed_connection_is_erased() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = ConnectionRegistry::new();
        let clock = ManualClock::new(0);
        let gone = registry.create(GuestId::new(1), "evernote", &clock);
        let kept = registry.create(GuestId::new(2), "evernote", &clock);
        seed(&db, &blobs, gone.id);
        seed(&db, &blobs, kept.id);

        let queue = CleanupQueue::start(CleanupConfig::new(2), db.clone(), db.clone(), blobs.clone());
        queue.remove_connection(&registry, gone.id).await.unwrap();
        let report = queue.shutdown().await;

        assert!(registry.get(gone.id).is_none());
        assert_eq!(report.completed, 1);
        assert_eq!(report.erased.facets, 1);
        assert_eq!(report.erased.attributes, 1);
        assert_eq!(report.erased.blobs, 1);
        assert_eq!(db.count(gone.id, None).unwrap(), 0);
        assert_eq!(db.get(gone.id, "evernoteLastUpdateCount").unwrap(), None);
        assert!(blobs.keys_for(gone.id.as_u64()).is_empty());

        assert_eq!(db.count(kept.id, None).unwrap(), 1);
        assert_eq!(blobs.keys_for(kept.id.as_u64()).len(), 1);
    }

    #[tokio::test]
    async fn remove_guest_erases_all_connections() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let registry = ConnectionRegistry::new();
        let clock = ManualClock::new(0);
        let a = registry.create(GuestId::new(9), "evernote", &clock);
        let b = registry.create(GuestId::new(9), "other", &clock);
        seed(&db, &blobs, a.id);
        seed(&db, &blobs, b.id);

        let queue = CleanupQueue::start(CleanupConfig::new(1), db.clone(), db.clone(), blobs.clone());
        let removed = queue.remove_guest(&registry, GuestId::new(9)).await.unwrap();
        assert_eq!(removed.len(), 2);
        let report = queue.shutdown().await;

        assert_eq!(report.enqueued, 2);
        assert_eq!(report.completed, 2);
        assert!(registry.list().is_empty());
        assert_eq!(blobs.len(), 0);
    }

    #[tokio::test]
    async fn duplicate_jobs_are_harmless() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let id = ConnectionId::new(4);
        seed(&db, &blobs, id);

        let queue = CleanupQueue::start(CleanupConfig::new(2), db.clone(), db.clone(), blobs.clone());
        queue.enqueue(id).await.unwrap();
        queue.enqueue(id).await.unwrap();
        let report = queue.shutdown().await;

        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.erased.facets, 1);
        assert_eq!(db.count(id, None).unwrap(), 0);
    }

    /// Fails a fixed number of times before delegating.
    struct FlakyBlobs {
        inner: MemoryBlobStore,
        failures_left: AtomicUsize,
    }

    impl BlobStore for FlakyBlobs {
        fn write(&self, key: &BlobKey, body: &[u8], mime: Option<&str>) -> StorageResult<()> {
            self.inner.write(key, body, mime)
        }

        fn read(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
            self.inner.read(key)
        }

        fn delete(&self, key: &BlobKey) -> StorageResult<bool> {
            self.inner.delete(key)
        }

        fn delete_connection(&self, connection_id: u64) -> StorageResult<usize> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(fluxsync_storage::StorageError::InvalidBlobKey(
                    "disk unavailable".into(),
                ));
            }
            self.inner.delete_connection(connection_id)
        }

        fn exists(&self, key: &BlobKey) -> StorageResult<bool> {
            self.inner.exists(key)
        }
    }

    #[tokio::test]
    async fn failing_job_is_retried_then_reported() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(FlakyBlobs {
            inner: MemoryBlobStore::new(),
            failures_left: AtomicUsize::new(4),
        });
        let config = CleanupConfig::new(1)
            .with_max_attempts(3)
            .with_retry_delay(Duration::from_millis(1));

        let queue = CleanupQueue::start(config, db.clone(), db.clone(), blobs.clone());
        // First job burns three failures, second job one failure then succeeds.
        queue.enqueue(ConnectionId::new(1)).await.unwrap();
        queue.enqueue(ConnectionId::new(2)).await.unwrap();
        let report = queue.shutdown().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_connections, vec![ConnectionId::new(1)]);
        assert_eq!(report.completed, 1);
        assert_eq!(report.retries, 3);
    }

    #[tokio::test]
    async fn closed_queue_rejects_jobs() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut queue = CleanupQueue::start(CleanupConfig::new(1), db.clone(), db, blobs);
        queue.sender = None;

        assert!(matches!(
            queue.enqueue(ConnectionId::new(1)).await,
            Err(SyncError::QueueClosed)
        ));
        assert!(matches!(
            queue.try_enqueue(ConnectionId::new(1)),
            Err(SyncError::QueueClosed)
        ));
    }
}
