//! # Fluxsync Engine
//!
//! Per-connection sync of a provider's change feed into local facets.
//!
//! This crate provides:
//! - The sync cycle (full, incremental, no-op and full resync)
//! - Reconciliation of provider payloads into facets and blobs
//! - Expunge handling with cascading removal
//! - Retry with exponential backoff
//! - Provider client abstraction with HTTP and in-memory implementations
//! - A scheduler running cycles for many connections
//! - A worker pool erasing removed connections
//!
//! ## Cycle
//!
//! A cycle pulls every page after the connection's checkpoint, applies
//! upserts in dependency order (tags, notebooks, notes with their
//! resources), then expunges, then commits the checkpoint:
//! 1. Nothing is committed until every write of the cycle succeeded
//! 2. Re-running an interrupted cycle converges to the same state
//! 3. An item both changed and expunged in one cycle ends up deleted
//!
//! ## Key Invariants
//!
//! - At most one cycle runs per connection
//! - The checkpoint never moves past changes that were not applied
//! - Payload fields that are absent never overwrite stored values
//! - Removing something that is already gone is a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod cleanup;
mod config;
mod engine;
mod error;
mod expunge;
mod http;
mod provider;
mod reconcile;
mod scheduler;
mod stats;

pub use cleanup::{CleanupQueue, CleanupReport, ErasedCounts};
pub use config::{CleanupConfig, RetryConfig, SchedulerConfig, SyncConfig};
pub use engine::{CancelToken, Checkpoint, CheckpointKeys, CyclePhase, SyncEngine, SyncOutcome};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::{
    HttpClient, HttpProvider, HttpProviderFactory, HttpResponse, ACCESS_TOKEN_KEY,
};
pub use provider::{
    MockCall, MockCalls, MockFailure, MockProvider, ProviderClient, ProviderFactory,
    StaticProviders,
};
pub use reconcile::{merge_note, merge_notebook, merge_resource, merge_tag};
pub use scheduler::{CycleHandle, Scheduler};
pub use stats::{CycleStats, EngineStats, KindCounts};
