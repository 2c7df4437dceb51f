//! Triggers sync cycles for many connections.
//!
//! Cycles of different connections run concurrently, bounded by
//! [`SchedulerConfig::max_concurrent`]. A trigger for a connection whose
//! cycle is already running is dropped, never queued.

use crate::config::SchedulerConfig;
use crate::engine::{CancelToken, SyncEngine, SyncOutcome};
use crate::error::{SyncError, SyncResult};
use fluxsync_core::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a triggered cycle.
pub type CycleHandle = JoinHandle<SyncResult<SyncOutcome>>;

/// Runs [`SyncEngine`] cycles on the tokio runtime.
///
/// Cycles are blocking work and run on the blocking pool. All methods that
/// start cycles must be called from within a tokio runtime.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    running: Arc<Mutex<HashMap<ConnectionId, CancelToken>>>,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(engine: Arc<SyncEngine>, config: SchedulerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            engine,
            config,
            permits,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Returns true if a cycle for the connection was triggered and has not
    /// finished.
    pub fn is_running(&self, connection_id: ConnectionId) -> bool {
        self.running.lock().contains_key(&connection_id)
    }

    /// Starts a cycle for a connection.
    ///
    /// Returns `None` if a cycle for the connection is already triggered or
    /// running.
    pub fn trigger(&self, connection_id: ConnectionId, force_full_sync: bool) -> Option<CycleHandle> {
        let token = {
            let mut running = self.running.lock();
            if running.contains_key(&connection_id) {
                info!(%connection_id, "cycle already running, trigger dropped");
                return None;
            }
            let token = CancelToken::new();
            running.insert(connection_id, token.clone());
            token
        };

        let engine = self.engine.clone();
        let permits = self.permits.clone();
        let running = self.running.clone();
        let backoff = self.config.failure_backoff;

        Some(tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    let cycle_engine = engine.clone();
                    let joined = tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        cycle_engine.sync_connector_with_cancel(
                            connection_id,
                            force_full_sync,
                            &token,
                        )
                    })
                    .await;
                    joined.unwrap_or_else(|e| {
                        Err(SyncError::transient(format!("sync task failed: {e}")))
                    })
                }
                Err(_) => Err(SyncError::Cancelled),
            };
            running.lock().remove(&connection_id);

            if let Err(e) = &result {
                if !matches!(e, SyncError::Cancelled | SyncError::UnknownConnection(_)) {
                    let wait = i64::try_from(backoff.as_millis()).unwrap_or(i64::MAX);
                    let until = engine.clock().now_millis().saturating_add(wait);
                    warn!(%connection_id, error = %e, until, "cycle failed, backing off");
                    if let Err(e) = engine
                        .connections()
                        .set_resume_not_before(connection_id, Some(until))
                    {
                        debug!(%connection_id, error = %e, "connection gone before backoff was recorded");
                    }
                }
            }
            result
        }))
    }

    /// Triggers every connection that may sync now and is not running.
    pub fn dispatch_due(&self) -> Vec<(ConnectionId, CycleHandle)> {
        let now = self.engine.clock().now_millis();
        self.engine
            .connections()
            .list()
            .into_iter()
            .filter(|c| c.may_sync_at(now) && !c.synching)
            .filter_map(|c| self.trigger(c.id, false).map(|handle| (c.id, handle)))
            .collect()
    }

    /// Triggers every due connection and waits for all of them.
    pub async fn run_due(&self) -> Vec<(ConnectionId, SyncResult<SyncOutcome>)> {
        let mut results = Vec::new();
        for (connection_id, handle) in self.dispatch_due() {
            let result = handle.await.unwrap_or_else(|e| {
                Err(SyncError::transient(format!("sync task failed: {e}")))
            });
            results.push((connection_id, result));
        }
        results
    }

    /// Requests cancellation of a connection's running cycle.
    /// Returns false if none is running.
    pub fn cancel(&self, connection_id: ConnectionId) -> bool {
        match self.running.lock().get(&connection_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Requests cancellation of every running cycle.
    pub fn cancel_all(&self) {
        for token in self.running.lock().values() {
            token.cancel();
        }
    }

    /// Polls for due connections every [`SchedulerConfig::poll_interval`]
    /// until `shutdown` turns true or its sender is dropped. Running cycles
    /// are cancelled on the way out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        info!(interval = ?self.config.poll_interval, "scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let dispatched = self.dispatch_due();
                    if !dispatched.is_empty() {
                        debug!(count = dispatched.len(), "dispatched due connections");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.cancel_all();
        info!("scheduler stopped");
    }
}
