//! # Fluxsync Core
//!
//! Data model and stores shared by every Fluxsync connector.
//!
//! This crate provides:
//! - The [`Facet`] model: one normalized record per provider item
//! - [`FacetQuery`] predicates and the [`FacetStore`] read-modify-write contract
//! - The [`AttributeStore`] for per-connection checkpoints and tokens
//! - [`Database`]: a journaled implementation of both stores
//! - [`ConnectionRegistry`] and [`ProviderRegistry`]
//! - A [`Clock`] abstraction so sync timing can be driven from tests
//!
//! ## Key Invariants
//!
//! - At most one live facet per (connection, kind, provider id)
//! - An upsert is atomic: the merge function sees the current facet and its
//!   result replaces it in one step
//! - Facets are partitioned by connection; no operation crosses connections

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod connection;
mod database;
mod error;
mod facet;
mod journal;
mod provider;
mod query;
mod store;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use connection::{Connection, ConnectionRegistry, ConnectionStatus};
pub use database::{Database, DatabaseStats, JOURNAL_FILE};
pub use error::{CoreError, CoreResult};
pub use facet::{
    Facet, FacetBody, LocationFacet, LocationSource, NoteFacet, NotebookFacet, ResourceFacet,
    TagFacet,
};
pub use journal::{JournalRecord, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use provider::{ProviderInfo, ProviderRegistry, ProviderRegistryBuilder};
pub use query::FacetQuery;
pub use store::{AttributeStore, FacetStore, MergeFn};
pub use types::{ConnectionId, FacetKind, GuestId, TimeRange};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
