//! Cycle and engine statistics.

use fluxsync_core::FacetKind;
use std::time::{Duration, Instant};

/// Counters per facet kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    /// Tags.
    pub tags: usize,
    /// Notebooks.
    pub notebooks: usize,
    /// Notes.
    pub notes: usize,
    /// Resources.
    pub resources: usize,
    /// Derived locations.
    pub locations: usize,
}

impl KindCounts {
    /// Adds `n` to the counter for `kind`.
    pub fn add(&mut self, kind: FacetKind, n: usize) {
        match kind {
            FacetKind::Tag => self.tags += n,
            FacetKind::Notebook => self.notebooks += n,
            FacetKind::Note => self.notes += n,
            FacetKind::Resource => self.resources += n,
            FacetKind::Location => self.locations += n,
        }
    }

    /// Sum over all kinds.
    pub fn total(&self) -> usize {
        self.tags + self.notebooks + self.notes + self.resources + self.locations
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    /// Whether the cycle fetched the feed from the beginning.
    pub full_sync: bool,
    /// Whether the provider invalidated the checkpoint and local data was
    /// erased first.
    pub full_resync: bool,
    /// Pages fetched.
    pub pages: usize,
    /// Facets created or updated.
    pub upserted: KindCounts,
    /// Facets removed.
    pub expunged: KindCounts,
    /// Malformed items skipped.
    pub skipped: usize,
    /// Items ignored because a newer version was already stored.
    pub stale: usize,
    /// Blob bodies written.
    pub blobs_written: usize,
    /// Blob bodies deleted.
    pub blobs_deleted: usize,
    /// Committed update count.
    pub update_count: i32,
    /// Committed server time.
    pub sync_time: i64,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Totals over the lifetime of an engine.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Cycles that committed a checkpoint.
    pub cycles_completed: u64,
    /// Cycles that found nothing to do.
    pub no_ops: u64,
    /// Cycles stopped by a provider rate limit.
    pub rate_limited: u64,
    /// Cycles stopped by rejected credentials.
    pub auth_expired: u64,
    /// Cycles that failed with any other error.
    pub failures: u64,
    /// Triggers dropped because the connection was already syncing.
    pub busy: u64,
    /// Retries made by `sync_with_retry`.
    pub retries: u64,
    /// Facets written across all cycles.
    pub facets_upserted: u64,
    /// Facets removed across all cycles.
    pub facets_expunged: u64,
    /// When the last cycle completed.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl EngineStats {
    pub(crate) fn record_cycle(&mut self, cycle: &CycleStats) {
        self.cycles_completed += 1;
        self.facets_upserted += cycle.upserted.total() as u64;
        self.facets_expunged += cycle.expunged.total() as u64;
        self.last_sync_time = Some(Instant::now());
        self.last_error = None;
    }
}
