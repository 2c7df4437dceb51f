//! Erase command implementation.

use super::{blob_store, open_existing, CliResult};
use fluxsync_core::{AttributeStore, ConnectionId, FacetStore};
use fluxsync_storage::BlobStore;
use std::path::Path;

/// What an erase removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EraseStats {
    /// Blob bodies deleted.
    pub blobs: usize,
    /// Facets deleted.
    pub facets: usize,
    /// Attributes deleted, checkpoints included.
    pub attributes: usize,
}

/// Runs the erase command.
pub fn run(path: &Path, connection: u64, provider: &str) -> CliResult<()> {
    let stats = erase(path, connection, provider)?;
    println!("Erased connection {connection}:");
    println!("  Blobs:      {}", stats.blobs);
    println!("  Facets:     {}", stats.facets);
    println!("  Attributes: {}", stats.attributes);
    Ok(())
}

/// Deletes a connection's blobs, then its facets, then its attributes.
pub fn erase(path: &Path, connection: u64, provider: &str) -> CliResult<EraseStats> {
    let db = open_existing(path)?;
    let id = ConnectionId::new(connection);

    let blobs = blob_store(path, provider).delete_connection(connection)?;
    let facets = db.erase_all(id)?;
    let attributes = db.remove_all(id)?;
    db.sync()?;

    tracing::info!(connection_id = %id, blobs, facets, attributes, "connection erased");
    Ok(EraseStats {
        blobs,
        facets,
        attributes,
    })
}
